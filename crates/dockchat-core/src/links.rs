//! Routing for links activated in rendered answers.

/// Scheme for links handled inside the application.
pub const AGENT_SCHEME: &str = "agent";

/// Signals the core raises for the host shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSignal {
    /// `agent://applyvip` was activated.
    OpenSettings,
    /// A feedback link was activated with this rating.
    FeedbackSubmitted(u8),
    /// Transient, user-facing message (e.g. an image failed to load).
    Notice(String),
}

/// What activating a URL should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    OpenSettings,
    Feedback(u8),
    OpenExternal(String),
    Ignored,
}

pub fn route_link(url: &str) -> LinkAction {
    let Ok(parsed) = url::Url::parse(url.trim()) else {
        return LinkAction::Ignored;
    };

    match parsed.scheme() {
        "http" | "https" => LinkAction::OpenExternal(parsed.to_string()),
        AGENT_SCHEME => match (parsed.host_str(), parsed.path()) {
            (Some("applyvip"), "" | "/") => LinkAction::OpenSettings,
            (Some("feedback"), path) => path
                .trim_start_matches('/')
                .parse::<u8>()
                .map_or(LinkAction::Ignored, LinkAction::Feedback),
            _ => LinkAction::Ignored,
        },
        _ => LinkAction::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_links() {
        assert_eq!(route_link("agent://applyvip"), LinkAction::OpenSettings);
        assert_eq!(route_link("agent://feedback/5"), LinkAction::Feedback(5));
        assert_eq!(route_link("agent://feedback/1"), LinkAction::Feedback(1));
    }

    #[test]
    fn malformed_agent_links_are_ignored() {
        assert_eq!(route_link("agent://feedback/"), LinkAction::Ignored);
        assert_eq!(route_link("agent://feedback/lots"), LinkAction::Ignored);
        assert_eq!(route_link("agent://feedback/900"), LinkAction::Ignored);
        assert_eq!(route_link("agent://unknown"), LinkAction::Ignored);
    }

    #[test]
    fn web_links_open_externally() {
        assert_eq!(
            route_link("https://docs.qgis.org/latest/"),
            LinkAction::OpenExternal("https://docs.qgis.org/latest/".to_string())
        );
        assert!(matches!(
            route_link(" http://example.com "),
            LinkAction::OpenExternal(_)
        ));
    }

    #[test]
    fn other_schemes_are_ignored() {
        assert_eq!(route_link("file:///etc/passwd"), LinkAction::Ignored);
        assert_eq!(route_link("javascript:alert(1)"), LinkAction::Ignored);
        assert_eq!(route_link("not a url"), LinkAction::Ignored);
    }
}
