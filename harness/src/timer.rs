use serde::{ser::SerializeMap, Serialize, Serializer};
use std::{
    fmt::{self, Display},
    time::{Duration, Instant},
};

/// Named measurements in insertion order, either stage timings in seconds or scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    entries: Vec<(String, f64)>,
    backend: Option<String>,
}

impl Measurements {
    /// All keys start at zero
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: keys.into_iter().map(|key| (key.into(), 0.0)).collect(),
            backend: None,
        }
    }

    fn slot(&mut self, key: &str) -> &mut f64 {
        let index = match self.entries.iter().position(|(name, _)| name == key) {
            Some(index) => index,
            None => {
                self.entries.push((key.to_owned(), 0.0));
                self.entries.len() - 1
            }
        };

        &mut self.entries[index].1
    }

    pub fn add(&mut self, key: &str, elapsed: Duration) {
        *self.slot(key) += elapsed.as_secs_f64();
    }

    pub fn add_secs(&mut self, key: &str, seconds: f64) {
        *self.slot(key) += seconds;
    }

    pub fn set(&mut self, key: &str, value: f64) {
        *self.slot(key) = value;
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| *value)
    }

    /// Run `f` and add its wall clock time to `key`
    pub fn time<T>(&mut self, key: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.add(key, start.elapsed());

        result
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl Display for Measurements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(backend) = &self.backend {
            writeln!(f, "{backend} times:")?;
        }

        for (name, value) in &self.entries {
            writeln!(f, "{name} = {value:.5} s")?;
        }

        Ok(())
    }
}

impl Serialize for Measurements {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;

        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        if let Some(backend) = &self.backend {
            map.serialize_entry("Backend", backend)?;
        }

        map.end()
    }
}
