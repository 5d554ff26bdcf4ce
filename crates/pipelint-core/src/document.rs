use serde::Serialize;
use serde_yaml::Value;

/// A parsed configuration document.
///
/// Mirrors the YAML data model with ordered mappings and string keys. All
/// structural checks read the tree through the accessors below instead of
/// indexing into it directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<Node>),
    Mapping(Mapping),
}

/// Insertion-ordered string-keyed mapping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mapping {
    entries: Vec<(String, Node)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Node) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Mapping {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, Node)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
        let mut mapping = Mapping::new();
        for (k, v) in iter {
            mapping.insert(k, v);
        }
        mapping
    }
}

impl Node {
    /// Look up a key on a mapping node. Any other node kind yields `None`.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    /// Walk a dotted path such as `jobs.build.steps.0.run`.
    ///
    /// Numeric segments index into sequences; everything else is a mapping key.
    pub fn get_path(&self, path: &str) -> Option<&Node> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |node, segment| match node {
            Node::Mapping(map) => map.get(segment),
            Node::Sequence(seq) => segment.parse::<usize>().ok().and_then(|i| seq.get(i)),
            _ => None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Node::Mapping(_))
    }

    /// Truthiness as a YAML consumer sees it: null, false, 0 and "" are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Node::Null => false,
            Node::Bool(b) => *b,
            Node::Number(n) => *n != 0.0,
            Node::String(s) => !s.is_empty(),
            Node::Sequence(_) | Node::Mapping(_) => true,
        }
    }

    /// `true` for null roots and empty mappings or sequences.
    pub fn is_empty_document(&self) -> bool {
        match self {
            Node::Null => true,
            Node::Mapping(map) => map.is_empty(),
            Node::Sequence(seq) => seq.is_empty(),
            _ => false,
        }
    }

    /// String form of a scalar. Collections yield `None`.
    pub fn scalar_string(&self) -> Option<String> {
        match self {
            Node::Null => Some("null".to_string()),
            Node::Bool(b) => Some(b.to_string()),
            Node::Number(n) => Some(format_number(*n)),
            Node::String(s) => Some(s.clone()),
            Node::Sequence(_) | Node::Mapping(_) => None,
        }
    }

    /// Strings of a scalar-or-sequence field such as `needs: build` / `needs: [a, b]`.
    pub fn string_list(&self) -> Vec<String> {
        match self {
            Node::Sequence(seq) => seq.iter().filter_map(Node::scalar_string).collect(),
            Node::Null | Node::Mapping(_) => Vec::new(),
            scalar => scalar.scalar_string().into_iter().collect(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        Value::Tagged(tagged) => key_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => serde_yaml::to_string(key)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => Node::String(s),
            Value::Sequence(seq) => Node::Sequence(seq.into_iter().map(Node::from).collect()),
            Value::Mapping(map) => Node::Mapping(
                map.into_iter()
                    .map(|(k, v)| (key_string(&k), Node::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Node::from(tagged.value),
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(src: &str) -> Node {
        Node::from(serde_yaml::from_str::<Value>(src).unwrap())
    }

    #[test]
    fn test_get_path_through_mappings_and_sequences() {
        let doc = yaml(
            "jobs:\n  build:\n    steps:\n      - run: npm ci\n      - uses: actions/cache@v4\n",
        );
        assert_eq!(
            doc.get_path("jobs.build.steps.0.run").and_then(Node::as_str),
            Some("npm ci")
        );
        assert_eq!(
            doc.get_path("jobs.build.steps.1.uses").and_then(Node::as_str),
            Some("actions/cache@v4")
        );
        assert!(doc.get_path("jobs.build.steps.7").is_none());
        assert!(doc.get_path("jobs.build.runs-on").is_none());
    }

    #[test]
    fn test_get_path_on_scalar_is_none() {
        let doc = yaml("name: CI\n");
        assert!(doc.get_path("name.first").is_none());
    }

    #[test]
    fn test_mapping_preserves_order() {
        let doc = yaml("zeta: 1\nalpha: 2\nmid: 3\n");
        let keys: Vec<_> = doc.as_mapping().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        let doc = yaml("true: yes\n42: answer\n");
        let map = doc.as_mapping().unwrap();
        assert!(map.contains_key("true"));
        assert!(map.contains_key("42"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Node::Null.is_truthy());
        assert!(!Node::Bool(false).is_truthy());
        assert!(!Node::String(String::new()).is_truthy());
        assert!(!Node::Number(0.0).is_truthy());
        assert!(Node::Mapping(Mapping::new()).is_truthy());
        assert!(Node::from("push").is_truthy());
    }

    #[test]
    fn test_string_list_from_scalar_and_sequence() {
        assert_eq!(yaml("needs: build").get("needs").unwrap().string_list(), vec!["build"]);
        assert_eq!(
            yaml("needs: [lint, test]").get("needs").unwrap().string_list(),
            vec!["lint", "test"]
        );
    }

    #[test]
    fn test_integer_numbers_render_without_fraction() {
        assert_eq!(Node::Number(18.0).scalar_string().as_deref(), Some("18"));
        assert_eq!(Node::Number(3.11).scalar_string().as_deref(), Some("3.11"));
    }
}
