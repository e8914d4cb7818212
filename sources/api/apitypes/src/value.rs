use serde::{Deserialize, Serialize};

/// A value carried by an Update.  Scalars are sent as native values; whole subtrees are sent as
/// JSON documents, using either internal or module-qualified ("IETF") member names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedValue {
    StringVal(String),
    IntVal(i64),
    UintVal(u64),
    BoolVal(bool),
    BytesVal(Vec<u8>),
    FloatVal(f64),
    JsonVal(#[serde(with = "json_bytes")] Vec<u8>),
    JsonIetfVal(#[serde(with = "json_bytes")] Vec<u8>),
    LeafListVal(Vec<TypedValue>),
}

impl TypedValue {
    /// Returns the encoded document if this is one of the JSON variants.
    pub fn json_bytes(&self) -> Option<&[u8]> {
        match self {
            TypedValue::JsonVal(b) | TypedValue::JsonIetfVal(b) => Some(b),
            _ => None,
        }
    }
}

/// JSON documents are bytes in the protocol, but we carry them as strings so that they stay
/// readable inside our own JSON messages.
mod json_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    #[default]
    Json,
    Bytes,
    Proto,
    Ascii,
    JsonIetf,
}

/// Identifies one schema module supported by the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelData {
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub version: String,
}

#[cfg(test)]
mod test {
    use super::{Encoding, TypedValue};
    use serde_json::json;

    #[test]
    fn json_payload_is_a_string() {
        let v = TypedValue::JsonIetfVal(br#"{"a":1}"#.to_vec());
        let ser = serde_json::to_value(&v).unwrap();
        assert_eq!(ser, json!({"json_ietf_val": "{\"a\":1}"}));

        let de: TypedValue = serde_json::from_value(ser).unwrap();
        assert_eq!(de.json_bytes(), Some(&br#"{"a":1}"#[..]));
    }

    #[test]
    fn scalar_forms() {
        let v: TypedValue = serde_json::from_value(json!({"uint_val": 10})).unwrap();
        assert_eq!(v, TypedValue::UintVal(10));
        assert_eq!(v.json_bytes(), None);

        let v: TypedValue =
            serde_json::from_value(json!({"leaf_list_val": [{"string_val": "a"}]})).unwrap();
        assert_eq!(
            v,
            TypedValue::LeafListVal(vec![TypedValue::StringVal("a".to_string())])
        );
    }

    #[test]
    fn encoding_names() {
        let e: Encoding = serde_json::from_value(json!("JSON_IETF")).unwrap();
        assert_eq!(e, Encoding::JsonIetf);
        assert_eq!(Encoding::default(), Encoding::Json);
    }
}
