//! Resource type guessing from paths and content types.

use url::Url;

use crate::db::ResourceType;

/// Guess a resource type from a URL or path's file extension.
pub fn resource_type_from_path(path: &str) -> ResourceType {
    // Only the path part decides; query and fragment are noise.
    let path = match Url::parse(path) {
        Ok(url) => url.path().to_ascii_lowercase(),
        Err(_) => path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    };

    let extension = match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => ext,
        _ => return ResourceType::Other,
    };

    match extension {
        "jpg" | "jpeg" | "png" | "gif" | "webp" => ResourceType::Image,
        "css" => ResourceType::Stylesheet,
        "js" => ResourceType::JavaScript,
        "html" | "htm" => ResourceType::Html,
        _ => match mime_guess::from_ext(extension).first() {
            Some(mime) => resource_type_from_content_type(mime.essence_str()),
            None => ResourceType::Other,
        },
    }
}

/// Guess from a `Content-Type` header, `Other` when it says nothing useful.
pub fn resource_type_from_content_type(content_type: &str) -> ResourceType {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("javascript") {
        ResourceType::JavaScript
    } else if content_type.contains("css") {
        ResourceType::Stylesheet
    } else if content_type.contains("image/") {
        ResourceType::Image
    } else if content_type.contains("html") {
        ResourceType::Html
    } else {
        ResourceType::Other
    }
}

/// Content type first, then the URL's extension.
pub fn guess_resource_type(url: &str, content_type: &str) -> ResourceType {
    match resource_type_from_content_type(content_type) {
        ResourceType::Other => resource_type_from_path(url),
        guessed => guessed,
    }
}
