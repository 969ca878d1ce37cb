use rand::seq::SliceRandom;

/// Well-known public relay endpoints, used until the network delivers a
/// fresher list.
const DEFAULT_SERVERS: &[&str] = &[
    "emwin.weathermessage.com:2211",
    "master.weathermessage.com:2211",
    "wxmesg.upstateweather.com:2211",
    "emwin.aprsfl.net:2211",
    "1.pool.iemwin.net:2211",
    "2.pool.iemwin.net:2211",
];

/// Candidate ByteBlaster endpoints, as `host:port` strings.
///
/// The relay network periodically broadcasts a replacement list in-band,
/// steering clients toward a healthier pool over time. Both address sets
/// are shuffled on construction so that simultaneous clients do not herd
/// onto the same first entry. A list is never mutated afterwards; wire
/// updates replace it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerList {
    primary: Vec<String>,
    satellite: Vec<String>,
}

impl ServerList {
    /// Build a list from explicit address sets, shuffling each.
    pub fn new(mut primary: Vec<String>, mut satellite: Vec<String>) -> Self {
        let mut rng = rand::thread_rng();
        primary.shuffle(&mut rng);
        satellite.shuffle(&mut rng);
        ServerList { primary, satellite }
    }

    /// Internet-connected relay servers, dialed in rotation.
    pub fn primary(&self) -> &[String] {
        &self.primary
    }

    /// Relays fed directly from the satellite broadcast.
    pub fn satellite(&self) -> &[String] {
        &self.satellite
    }

    /// Parse the wire grammar:
    ///
    /// ```text
    /// /ServerList/host:port|host:port\ServerList\/SatServers/host:port+host:port\SatServers\
    /// ```
    ///
    /// Returns `None` if the text does not match or contains no usable
    /// primary address.
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix("/ServerList/")?;
        let (primary_text, rest) = rest.split_once("\\ServerList\\")?;
        let primary = split_hosts(primary_text, '|');

        let satellite = match rest.trim_matches('\0') {
            "" => Vec::new(),
            rest => {
                let rest = rest.strip_prefix("/SatServers/")?;
                let (satellite_text, _) = rest.split_once("\\SatServers\\")?;
                split_hosts(satellite_text, '+')
            }
        };

        if primary.is_empty() {
            return None;
        }
        Some(ServerList::new(primary, satellite))
    }
}

impl Default for ServerList {
    fn default() -> Self {
        ServerList::new(
            DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
        )
    }
}

fn split_hosts(text: &str, separator: char) -> Vec<String> {
    text.split(separator)
        .map(str::trim)
        .filter(|entry| {
            match entry.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() => port.parse::<u16>().is_ok(),
                _ => {
                    if !entry.is_empty() {
                        log::debug!("discarding malformed server entry {:?}", entry);
                    }
                    false
                }
            }
        })
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_sections() {
        let list =
            ServerList::parse("/ServerList/a:1|b:2\\ServerList\\/SatServers/c:3\\SatServers\\")
                .unwrap();

        let mut primary = list.primary().to_vec();
        primary.sort();
        assert_eq!(primary, ["a:1", "b:2"]);
        assert_eq!(list.satellite(), ["c:3"]);
    }

    #[test]
    fn satellite_section_is_optional() {
        let list = ServerList::parse("/ServerList/a:1|b:2\\ServerList\\").unwrap();
        assert_eq!(list.primary().len(), 2);
        assert!(list.satellite().is_empty());
    }

    #[test]
    fn discards_malformed_entries() {
        let list = ServerList::parse(
            "/ServerList/a:1|nonsense|b:notaport|:5|c:2\\ServerList\\/SatServers/\\SatServers\\",
        )
        .unwrap();

        let mut primary = list.primary().to_vec();
        primary.sort();
        assert_eq!(primary, ["a:1", "c:2"]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(ServerList::parse("").is_none());
        assert!(ServerList::parse("/ServerList/a:1").is_none());
        assert!(ServerList::parse("/SatServers/c:3\\SatServers\\").is_none());
        assert!(ServerList::parse("/ServerList/\\ServerList\\").is_none());
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let addresses: Vec<String> = (0..32).map(|i| format!("host{}:1000", i)).collect();
        let list = ServerList::new(addresses.clone(), Vec::new());

        let mut shuffled = list.primary().to_vec();
        shuffled.sort();
        let mut expected = addresses;
        expected.sort();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn default_pool_is_populated() {
        let list = ServerList::default();
        assert!(!list.primary().is_empty());
        assert!(list.primary().iter().all(|entry| entry.contains(':')));
    }
}
