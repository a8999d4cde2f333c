//! Utility functions and helpers.

pub mod http;

/// Join a base URL and a relative path with exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://static.example/www/2.0", "school/31/info.json"),
            "https://static.example/www/2.0/school/31/info.json"
        );
        assert_eq!(
            join_url("https://static.example/www/2.0/", "/school/31/info.json"),
            "https://static.example/www/2.0/school/31/info.json"
        );
    }
}
