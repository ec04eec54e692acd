//! Magnet URI locators
//!
//! Engines that resolve magnet links only need the info hash and the
//! optional display name, exact length and tracker parameters.

use magnet_url::Magnet;
use url::Url;

use super::{EngineError, InfoHash};

const BTIH_PREFIX: &str = "urn:btih:";

/// Parsed `magnet:?xt=urn:btih:...` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLocator {
    pub info_hash: InfoHash,
    /// `dn` parameter
    pub display_name: Option<String>,
    /// `xl` parameter
    pub exact_length: Option<u64>,
    /// `tr` parameters
    pub trackers: Vec<String>,
}

impl MagnetLocator {
    /// Parses a magnet URI with a hex `btih` exact topic.
    ///
    /// # Errors
    /// - `EngineError::InvalidLocator` - Not a magnet URI or no usable `xt`
    pub fn parse(locator: &str) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };

        let magnet = Magnet::new(locator).map_err(|e| invalid(&format!("invalid magnet: {e}")))?;

        // Hash and length come from the raw query, parsed strictly
        let url = Url::parse(locator).map_err(|e| invalid(&e.to_string()))?;
        let mut info_hash = None;
        let mut exact_length = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let hex = value
                        .strip_prefix(BTIH_PREFIX)
                        .ok_or_else(|| invalid("exact topic is not urn:btih"))?;
                    info_hash = Some(InfoHash::from_hex(hex).map_err(|e| invalid(&e.to_string()))?);
                }
                "xl" => {
                    exact_length = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| invalid("exact length is not a number"))?,
                    );
                }
                _ => {}
            }
        }

        Ok(Self {
            info_hash: info_hash.ok_or_else(|| invalid("missing xt parameter"))?,
            display_name: magnet.display_name().map(|name| name.to_string()),
            exact_length,
            trackers: magnet.trackers().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_magnet() {
        let hash = "0123456789abcdef0123456789abcdef01234567";
        let locator = format!(
            "magnet:?xt=urn:btih:{hash}&dn=Big.Buck.Bunny.mp4&xl=1048576&tr=udp://t.example:1337"
        );

        let magnet = MagnetLocator::parse(&locator).unwrap();
        assert_eq!(magnet.info_hash.to_string(), hash);
        assert_eq!(magnet.display_name.as_deref(), Some("Big.Buck.Bunny.mp4"));
        assert_eq!(magnet.exact_length, Some(1_048_576));
        assert_eq!(magnet.trackers, vec!["udp://t.example:1337".to_string()]);
    }

    #[test]
    fn test_parse_minimal_magnet() {
        let hash = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";
        let magnet = MagnetLocator::parse(&format!("magnet:?xt=urn:btih:{hash}")).unwrap();

        assert_eq!(magnet.info_hash.to_string(), hash);
        assert!(magnet.display_name.is_none());
        assert!(magnet.exact_length.is_none());
        assert!(magnet.trackers.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_magnet() {
        assert!(matches!(
            MagnetLocator::parse("https://example.com/a.torrent"),
            Err(EngineError::InvalidLocator { .. })
        ));
        assert!(MagnetLocator::parse("magnet:?dn=nothing").is_err());
        assert!(MagnetLocator::parse("magnet:?xt=urn:sha1:abcdef").is_err());
    }
}
