//! User-Agent string shared by catalog, thread and file requests.

/// Default User-Agent (tool name and crate version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("boardsync/{version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_crate_version() {
        let ua = default_user_agent();
        assert_eq!(ua.strip_prefix("boardsync/"), Some(env!("CARGO_PKG_VERSION")));
    }
}
