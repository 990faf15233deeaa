use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A key that uniquely identifies a metric by name and label set.
///
/// Label order does not matter. Distinct label sets that hash to the same
/// value are indistinguishable, the later write replaces the earlier one.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct MetricKey {
    pub name: String,
    pub labels_hash: u64,
}

impl MetricKey {
    pub fn new<'a, K, V>(name: &str, labels: impl IntoIterator<Item = (&'a K, &'a V)>) -> Self
    where
        K: AsRef<str> + ?Sized + 'a,
        V: AsRef<str> + ?Sized + 'a,
    {
        Self {
            name: name.to_string(),
            labels_hash: hash_labels(labels),
        }
    }
}

/// Hash a label set deterministically by sorting keys.
fn hash_labels<'a, K, V>(labels: impl IntoIterator<Item = (&'a K, &'a V)>) -> u64
where
    K: AsRef<str> + ?Sized + 'a,
    V: AsRef<str> + ?Sized + 'a,
{
    let mut pairs: Vec<(&str, &str)> = labels
        .into_iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = DefaultHasher::new();

    for (k, v) in pairs {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn equal_for_same_labels() {
        let key1 = MetricKey::new("test_metric", &labels(&[("env", "prod")]));
        let key2 = MetricKey::new("test_metric", &labels(&[("env", "prod")]));

        assert_eq!(key1, key2);
        assert_eq!(key1.labels_hash, key2.labels_hash);
    }

    #[test]
    fn differs_for_different_labels() {
        let prod = MetricKey::new("test_metric", &labels(&[("env", "prod")]));
        let dev = MetricKey::new("test_metric", &labels(&[("env", "dev")]));
        let stage = MetricKey::new("test_metric", &labels(&[("stage", "prod")]));
        let more = MetricKey::new("test_metric", &labels(&[("env", "prod"), ("az", "z1")]));

        assert_ne!(prod, dev);
        assert_ne!(prod, stage);
        assert_ne!(prod, more);
    }

    #[test]
    fn order_independent() {
        let pairs = [("a", "1"), ("b", "2"), ("c", "3")];
        let forward: Vec<(&str, &str)> = pairs.to_vec();
        let reverse: Vec<(&str, &str)> = pairs.iter().rev().copied().collect();

        let key1 = MetricKey::new("m", forward.iter().map(|(k, v)| (*k, *v)));
        let key2 = MetricKey::new("m", reverse.iter().map(|(k, v)| (*k, *v)));

        assert_eq!(key1, key2);
    }

    #[test]
    fn key_and_value_boundaries_matter() {
        let key1 = MetricKey::new("m", &labels(&[("ab", "c")]));
        let key2 = MetricKey::new("m", &labels(&[("a", "bc")]));

        assert_ne!(key1, key2);
    }
}
