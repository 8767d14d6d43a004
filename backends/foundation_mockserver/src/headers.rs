//! Ordered, case-preserving HTTP header list.
//!
//! WHY: Recorded requests must round-trip header names and values exactly as the
//! client sent them, in the order it sent them, while test assertions look headers
//! up without caring about case.
//!
//! WHAT: [`Headers`], a list of `(name, value)` pairs with ASCII case-insensitive
//! lookup helpers.

/// A single header line as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<HeaderLine>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a header line, keeping any existing lines with the same name.
    pub fn add<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.0.push(HeaderLine {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replaces every line named `name` with a single line.
    ///
    /// The new line takes the position of the first removed line, or goes last
    /// when the name was absent.
    pub fn set<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();

        match self.position(&name) {
            Some(index) => {
                self.0[index] = HeaderLine {
                    name: name.clone(),
                    value,
                };
                let mut seen_first = false;
                self.0.retain(|line| {
                    if !line.name.eq_ignore_ascii_case(&name) {
                        return true;
                    }
                    if seen_first {
                        return false;
                    }
                    seen_first = true;
                    true
                });
            }
            None => self.add(name, value),
        }
    }

    /// Removes every line named `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|line| !line.name.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    /// Last value sent for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|line| line.name.eq_ignore_ascii_case(name))
            .map(|line| line.value.as_str())
    }

    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|line| line.name.eq_ignore_ascii_case(name))
            .map(|line| line.value.as_str())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Distinct header names in first-seen order, with their original casing.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for line in &self.0 {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&line.name)) {
                names.push(line.name.as_str());
            }
        }
        names
    }

    /// True when any comma separated element of any `name` value equals `token`,
    /// ignoring case. Used for `Connection` and `Transfer-Encoding` style lists.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).iter().any(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderLine> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0
            .iter()
            .position(|line| line.name.eq_ignore_ascii_case(name))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a HeaderLine;
    type IntoIter = std::slice::Iter<'a, HeaderLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_but_iteration_keeps_it() {
        let headers: Headers = [
            ("Host", "example.com"),
            ("accept-ENCODING", "gzip"),
            ("X-Trace", "a"),
        ]
        .into_iter()
        .collect();

        assert_eq!(headers.get("accept-encoding"), Some("gzip"));
        assert_eq!(headers.get("HOST"), Some("example.com"));

        let names: Vec<&str> = headers.iter().map(|line| line.name.as_str()).collect();
        assert_eq!(names, vec!["Host", "accept-ENCODING", "X-Trace"]);
    }

    #[test]
    fn get_returns_last_value_and_get_all_every_value() {
        let mut headers = Headers::new();
        headers.add("Cookie", "a=1");
        headers.add("Accept", "text/plain");
        headers.add("cookie", "b=2");

        assert_eq!(headers.get("Cookie"), Some("b=2"));
        assert_eq!(headers.get_all("COOKIE"), vec!["a=1", "b=2"]);
        assert_eq!(headers.names(), vec!["Cookie", "Accept"]);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut headers = Headers::new();
        headers.add("Content-Length", "0");
        headers.add("Server", "mock");
        headers.add("content-length", "9");

        headers.set("Content-Length", "11");

        let lines: Vec<(&str, &str)> = headers
            .iter()
            .map(|line| (line.name.as_str(), line.value.as_str()))
            .collect();
        assert_eq!(lines, vec![("Content-Length", "11"), ("Server", "mock")]);
    }

    #[test]
    fn remove_and_tokens() {
        let mut headers = Headers::new();
        headers.add("Connection", "Upgrade, HTTP2-Settings");
        headers.add("Upgrade", "h2c");

        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));

        assert_eq!(headers.remove("UPGRADE"), 1);
        assert!(!headers.contains("Upgrade"));
        assert_eq!(headers.len(), 1);
    }
}
