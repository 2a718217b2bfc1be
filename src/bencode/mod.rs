mod decoder;
mod encoder;
mod value;

pub use decoder::decode;
pub use encoder::encode;
pub use value::{BencodeValue, Dict};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_encoding() {
        assert_eq!(encode(&BencodeValue::Integer(42)), b"i42e");
        assert_eq!(encode(&BencodeValue::Integer(-7)), b"i-7e");
    }

    #[test]
    fn test_string_encoding() {
        let value = BencodeValue::String(b"spam".to_vec());
        assert_eq!(encode(&value), b"4:spam");
    }

    #[test]
    fn test_list_encoding() {
        let value = BencodeValue::List(vec![
            BencodeValue::String(b"spam".to_vec()),
            BencodeValue::Integer(42),
        ]);
        assert_eq!(encode(&value), b"l4:spami42ee");
    }

    #[test]
    fn test_dict_keeps_insertion_order() {
        let mut dict = Dict::new();
        dict.insert(b"foo".to_vec(), BencodeValue::Integer(42));
        dict.insert(b"bar".to_vec(), BencodeValue::from("spam"));
        let encoded = encode(&BencodeValue::Dict(dict));
        assert_eq!(encoded, b"d3:fooi42e3:bar4:spame");
    }

    #[test]
    fn test_decode_preserves_key_order() {
        let raw = b"d1:zi1e1:ai2ee";
        let decoded = decode(raw).unwrap();
        let keys: Vec<&[u8]> = decoded.as_dict().unwrap().iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"z".as_ref(), b"a".as_ref()]);
        assert_eq!(encode(&decoded), raw);
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let mut dict = Dict::new();
        dict.insert("a", BencodeValue::Integer(1));
        dict.insert("a", BencodeValue::Integer(2));
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(b"a"), Some(&BencodeValue::Integer(2)));
    }

    #[test]
    fn test_rejects_non_canonical_integers() {
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"ie").is_err());
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
    }

    #[test]
    fn test_rejects_non_canonical_string_lengths() {
        assert!(decode(b"01:a").is_err());
        assert!(decode(b"+1:a").is_err());
        assert!(decode(b"00:").is_err());
        assert_eq!(decode(b"0:").unwrap(), BencodeValue::String(Vec::new()));
        assert_eq!(decode(b"1:a").unwrap(), BencodeValue::from("a"));
    }

    #[test]
    fn test_rejects_duplicate_dict_keys() {
        assert!(decode(b"d1:ai1e1:ai2ee").is_err());
        assert!(decode(b"d1:ai1e1:bi2ee").is_ok());
    }

    #[test]
    fn test_rejects_truncated_input() {
        assert!(decode(b"5:abc").is_err());
        assert!(decode(b"l4:spam").is_err());
        assert!(decode(b"d3:foo").is_err());
        assert!(decode(b"di1ei2ee").is_err());
    }

    #[test]
    fn test_roundtrip() {
        let original = BencodeValue::List(vec![
            BencodeValue::Integer(123),
            BencodeValue::String(b"test".to_vec()),
        ]);
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(original, decoded);
    }
}
