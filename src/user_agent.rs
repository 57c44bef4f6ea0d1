//! User-Agent string sent with every API request.

/// Project URL advertised in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/citefetch";

/// Default User-Agent identifying the tool and its version.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("citefetch/{version} (citation-harvester; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version_and_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL));
        assert_eq!(
            ua.strip_prefix("citefetch/")
                .and_then(|rest| rest.split(' ').next()),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }
}
