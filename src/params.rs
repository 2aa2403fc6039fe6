//! Request parameter list.
//!
//! A request arrives as ordered name/value string pairs, identical whether
//! decoded from command-line arguments or CGI input. Names are
//! case-sensitive, except boolean-like flags which are looked up with
//! lowercase normalization. Numeric parsing is best-effort: unparsable input
//! is treated identically to an absent field, never as a distinct error.

/// Ordered name/value parameter list for one request.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Build from any iterator of string-ish pairs. Test convenience.
    pub fn from_pairs<N, V, I>(pairs: I) -> Self
    where
        N: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (N, V)>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }

    /// Case-sensitive lookup; first match wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Lowercase-normalized lookup for boolean-like flags.
    pub fn get_flag_value(&self, name: &str) -> Option<&str> {
        let wanted = name.to_ascii_lowercase();
        self.pairs
            .iter()
            .find(|(n, _)| n.to_ascii_lowercase() == wanted)
            .map(|(_, v)| v.as_str())
    }

    /// Interpret a boolean-like flag: `true`/`1` is true, `false`/`0` is
    /// false (both case-insensitive), anything else (including absence) is
    /// `None`.
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self
            .get_flag_value(name)
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            Some("true") | Some("1") => Some(true),
            Some("false") | Some("0") => Some(false),
            _ => None,
        }
    }

    /// Flag convenience: true only on an explicit `true`/`1`.
    pub fn flag_set(&self, name: &str) -> bool {
        self.flag(name) == Some(true)
    }

    /// Best-effort unsigned parse; unparsable means absent.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// Best-effort signed parse; unparsable means absent.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// Parse a comma-separated list of integers, best-effort per element:
    /// the list ends at the first unparsable element.
    pub fn get_i64_list(&self, name: &str) -> Option<Vec<i64>> {
        let raw = self.get(name)?;
        let mut out = Vec::new();
        for piece in raw.split(',') {
            match piece.trim().parse() {
                Ok(v) => out.push(v),
                Err(_) => break,
            }
        }
        Some(out)
    }

    /// Parse a comma-separated list of unsigned integers, skipping
    /// unparsable elements.
    pub fn get_u64_list(&self, name: &str) -> Option<Vec<u64>> {
        let raw = self.get(name)?;
        Some(
            raw.split(',')
                .filter_map(|piece| piece.trim().parse().ok())
                .collect(),
        )
    }

    /// All pairs in arrival order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params::from_pairs([
            ("Method", "GetPixels"),
            ("PixelsID", "17"),
            ("theZ", "3"),
            ("IsLocalFile", "TRUE"),
            ("islocalfile", "true"),
            ("Garbage", "12abc"),
        ])
    }

    #[test]
    fn test_case_sensitive_lookup() {
        let p = params();
        assert_eq!(p.get("Method"), Some("GetPixels"));
        assert_eq!(p.get("method"), None);
        assert_eq!(p.get("PixelsID"), Some("17"));
    }

    #[test]
    fn test_flag_lowercase_normalized() {
        let p = params();
        // both the flag name and its value match case-insensitively
        assert_eq!(p.flag("IsLocalFile"), Some(true));
        let p = Params::from_pairs([("ISLOCALFILE", "1")]);
        assert_eq!(p.flag("IsLocalFile"), Some(true));
        let p = Params::from_pairs([("BigEndian", "false")]);
        assert_eq!(p.flag("BigEndian"), Some(false));
        let p = Params::from_pairs([("BigEndian", "maybe")]);
        assert_eq!(p.flag("BigEndian"), None);
    }

    #[test]
    fn test_best_effort_numeric() {
        let p = params();
        assert_eq!(p.get_u64("PixelsID"), Some(17));
        // unparsable is indistinguishable from absent
        assert_eq!(p.get_u64("Garbage"), None);
        assert_eq!(p.get_u64("NotThere"), None);
        assert_eq!(p.get_i64("theZ"), Some(3));
    }

    #[test]
    fn test_id_list() {
        let p = Params::from_pairs([("FileID", "1,2,3")]);
        assert_eq!(p.get_u64_list("FileID"), Some(vec![1, 2, 3]));
        let p = Params::from_pairs([("FileID", "7")]);
        assert_eq!(p.get_u64_list("FileID"), Some(vec![7]));
    }

    #[test]
    fn test_i64_list_stops_at_garbage() {
        let p = Params::from_pairs([("Dims", "4,4,1,x,1,2")]);
        assert_eq!(p.get_i64_list("Dims"), Some(vec![4, 4, 1]));
    }
}
