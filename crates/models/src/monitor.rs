use crate::{CustomerId, HostSchemeId, MonitorId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
        }
    }

    pub fn parse(value: &str) -> Option<HttpMethod> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "HEAD" => Some(HttpMethod::Head),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            "OPTIONS" => Some(HttpMethod::Options),
            "PATCH" => Some(HttpMethod::Patch),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ContentCheckMode {
    #[default]
    NoCheck,
    ContentMatch,
    AnyKeywords,
    AllKeywords,
    SmartContentMatch,
}

impl ContentCheckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentCheckMode::NoCheck => "NO_CHECK",
            ContentCheckMode::ContentMatch => "CONTENT_MATCH",
            ContentCheckMode::AnyKeywords => "ANY_KEYWORDS",
            ContentCheckMode::AllKeywords => "ALL_KEYWORDS",
            ContentCheckMode::SmartContentMatch => "SMART_CONTENT_MATCH",
        }
    }

    pub fn parse(value: &str) -> Option<ContentCheckMode> {
        match value.to_ascii_lowercase().as_str() {
            "no_check" => Some(ContentCheckMode::NoCheck),
            "content_match" => Some(ContentCheckMode::ContentMatch),
            "any_keywords" => Some(ContentCheckMode::AnyKeywords),
            "all_keywords" => Some(ContentCheckMode::AllKeywords),
            "smart_content_match" => Some(ContentCheckMode::SmartContentMatch),
            _ => None,
        }
    }

    pub fn uses_keywords(self) -> bool {
        matches!(
            self,
            ContentCheckMode::AnyKeywords | ContentCheckMode::AllKeywords
        )
    }

    pub fn uses_content_match(self) -> bool {
        matches!(
            self,
            ContentCheckMode::ContentMatch | ContentCheckMode::SmartContentMatch
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PostContentType {
    Json,
    Xml,
    #[default]
    Text,
}

impl PostContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            PostContentType::Json => "JSON",
            PostContentType::Xml => "XML",
            PostContentType::Text => "TEXT",
        }
    }

    pub fn parse(value: &str) -> Option<PostContentType> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Some(PostContentType::Json),
            "xml" => Some(PostContentType::Xml),
            "text" => Some(PostContentType::Text),
            _ => None,
        }
    }
}

/// A single configured probe target. `(host_scheme_id, path)` uniquely
/// identifies a monitor within its customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub id: MonitorId,
    pub customer_id: CustomerId,
    pub host_scheme_id: HostSchemeId,
    pub user_ordering: u16,
    /// Slug: path plus `?query` when one exists. Fragments are rejected at
    /// the edges, so none ever appears here.
    pub path: String,
    pub method: HttpMethod,
    pub content_check_mode: ContentCheckMode,
    pub keywords: Vec<Vec<u8>>,
    pub post_content_type: PostContentType,
    pub post_user_agent: String,
    pub post_content: Vec<u8>,
}

/// Builds the monitor slug from a path and optional query. A `?query` is
/// appended directly when the path already ends in `/`, otherwise separated
/// by `/`.
pub fn slug_of(path: &str, query: Option<&str>) -> String {
    match query {
        None | Some("") => path.to_string(),
        Some(query) if path.ends_with('/') => format!("{path}?{query}"),
        Some(query) => format!("{path}/?{query}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slug_separator_depends_on_trailing_slash() {
        assert_eq!(slug_of("/", None), "/");
        assert_eq!(slug_of("/about", None), "/about");
        assert_eq!(slug_of("/search", Some("q=1")), "/search/?q=1");
        assert_eq!(slug_of("/search/", Some("q=1")), "/search/?q=1");
        assert_eq!(slug_of("/about", Some("")), "/about");
    }

    #[test]
    fn enums_parse_their_wire_forms() {
        assert_eq!(HttpMethod::parse("post"), Some(HttpMethod::Post));
        assert_eq!(HttpMethod::parse("TRACE"), None);
        assert_eq!(
            ContentCheckMode::parse("ALL_KEYWORDS"),
            Some(ContentCheckMode::AllKeywords)
        );
        assert_eq!(PostContentType::parse("Json"), Some(PostContentType::Json));
    }

    #[test]
    fn keyword_modes() {
        assert!(ContentCheckMode::AnyKeywords.uses_keywords());
        assert!(!ContentCheckMode::SmartContentMatch.uses_keywords());
        assert!(ContentCheckMode::SmartContentMatch.uses_content_match());
        assert!(!ContentCheckMode::NoCheck.uses_content_match());
    }
}
