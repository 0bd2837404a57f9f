//! URL query-string builder.

/// Accumulates query parameters for a URL.
///
/// Adding a key that is already present replaces its value in place. A
/// `None` value renders the key alone, without `=`.
#[derive(Debug, Clone)]
pub struct QueryParams {
    url: String,
    params: Vec<(String, Option<String>)>,
}

impl QueryParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn add(mut self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Option<impl ToString>) {
        let key = key.into();
        let value = value.map(|v| v.to_string());
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.params.push((key, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn build(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }

        let query = self
            .params
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                ),
                None => urlencoding::encode(key).into_owned(),
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.url, query)
    }
}
