use url::Url;

/**
Builds a URL for `path` on the bridge at `address`.

`address` may be a bare host (`192.168.1.2`, `bridge.local:8080`), a scheme-relative
`//host`, or a full URL. A missing scheme defaults to plain HTTP, and any path on
`address` is replaced by `path`.
 */
pub fn endpoint(address: &str, path: &str) -> Result<Url, url::ParseError> {
    let address = address.trim();
    let absolute = if address.contains("://") {
        address.to_string()
    } else if let Some(rest) = address.strip_prefix("//") {
        format!("http://{}", rest)
    } else {
        format!("http://{}", address)
    };
    let mut url = Url::parse(&absolute)?;
    url.set_path(path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address_defaults_to_http() {
        let url = endpoint("192.168.1.2", "/description.xml").unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.2/description.xml");
    }

    #[test]
    fn test_port_is_kept() {
        let url = endpoint("127.0.0.1:8080", "/api/config").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/config");
    }

    #[test]
    fn test_existing_scheme_and_path() {
        let url = endpoint("https://bridge.local/some/where", "/description.xml").unwrap();
        assert_eq!(url.as_str(), "https://bridge.local/description.xml");

        let url = endpoint("//10.0.0.1", "/description.xml").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1/description.xml");
    }

    #[test]
    fn test_empty_address_is_an_error() {
        assert!(endpoint("", "/description.xml").is_err());
    }
}
