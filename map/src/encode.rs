//! Reduction of map keys to canonical byte sequences.
//!
//! A key's bytes are what gets hashed to find its place in the trie, so two
//! keys that compare equal must produce the same bytes. We get there by
//! driving the key's [`Serialize`] implementation with a serializer that
//! writes out the *value* of the key:
//!
//! - strings and chars encode as their UTF-8 bytes,
//! - numbers and bools encode as their little-endian value bytes,
//! - fixed-shape composites (tuples, arrays, structs, enums, options) encode
//!   as the concatenation of their parts.
//!
//! Anything whose shape isn't fixed by its type (sequences like `Vec` or
//! slices, maps and sets, byte buffers) is rejected with a [`KeyTypeError`].
//! Types like closures or raw pointers don't implement `Serialize` at all, so
//! they are rejected at compile time.

use std::{fmt::Display, hash::Hasher};

use serde::{
    ser::{self, Impossible},
    Serialize,
};

/// The reason a key couldn't be encoded.
///
/// This is also the error type of the key serializer, which is why it can
/// carry an arbitrary message: custom `Serialize` implementations are free to
/// fail.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Unencodable {
    #[error("it contains a {0}, which has no fixed value representation")]
    Indirection(&'static str),

    #[error("{0}")]
    Custom(String),
}

impl ser::Error for Unencodable {
    fn custom<T: Display>(msg: T) -> Self {
        Unencodable::Custom(msg.to_string())
    }
}

/// A key's type can't be reduced to a stable byte representation.
///
/// This is a programming error: the map operations that take a key panic with
/// it, and only their `try_*` variants return it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("a value of type `{type_name}` can't be used as a map key: {reason}")]
pub struct KeyTypeError {
    pub type_name: &'static str,
    pub reason: Unencodable,
}

/// Somewhere to put encoded bytes.
trait Sink {
    fn put(&mut self, bytes: &[u8]);
}

impl Sink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

// Hashing straight from the serializer saves buffering the encoding.
struct HashSink<'h, H>(&'h mut H);

impl<H: Hasher> Sink for HashSink<'_, H> {
    fn put(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}

/// Returns the canonical byte encoding of `key`.
///
/// # Examples
///
/// ```rust
/// # use immutable_map::encode::encode;
/// assert_eq!(encode("abc").unwrap(), b"abc");
/// assert_eq!(encode(&1u16).unwrap(), [1, 0]);
/// assert_eq!(encode(&('a', [1u8, 2])).unwrap(), b"a\x01\x02");
/// assert!(encode(&vec![1, 2, 3]).is_err());
/// ```
pub fn encode<K: Serialize + ?Sized>(key: &K) -> Result<Vec<u8>, KeyTypeError> {
    let mut encoder = KeyEncoder { sink: Vec::new() };
    run(key, &mut encoder)?;
    Ok(encoder.sink)
}

/// Feeds the canonical byte encoding of `key` into `hasher`.
pub(crate) fn encode_into<K: Serialize + ?Sized, H: Hasher>(
    key: &K,
    hasher: &mut H,
) -> Result<(), KeyTypeError> {
    run(
        key,
        &mut KeyEncoder {
            sink: HashSink(hasher),
        },
    )
}

fn run<K: Serialize + ?Sized, S: Sink>(
    key: &K,
    encoder: &mut KeyEncoder<S>,
) -> Result<(), KeyTypeError> {
    key.serialize(encoder).map_err(|reason| {
        let type_name = std::any::type_name::<K>();
        log::trace!("rejected key of type `{type_name}`: {reason}");
        KeyTypeError { type_name, reason }
    })
}

struct KeyEncoder<S> {
    sink: S,
}

impl<S: Sink> KeyEncoder<S> {
    fn variant(&mut self, variant_index: u32) {
        self.sink.put(&variant_index.to_le_bytes());
    }
}

macro_rules! encode_number {
    ($method:ident, $type:ty) => {
        fn $method(self, v: $type) -> Result<(), Unencodable> {
            self.sink.put(&v.to_le_bytes());
            Ok(())
        }
    };
}

impl<S: Sink> ser::Serializer for &mut KeyEncoder<S> {
    type Ok = ();
    type Error = Unencodable;

    type SerializeSeq = Impossible<(), Unencodable>;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Impossible<(), Unencodable>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn serialize_bool(self, v: bool) -> Result<(), Unencodable> {
        self.sink.put(&[u8::from(v)]);
        Ok(())
    }

    encode_number!(serialize_i8, i8);
    encode_number!(serialize_i16, i16);
    encode_number!(serialize_i32, i32);
    encode_number!(serialize_i64, i64);
    encode_number!(serialize_i128, i128);
    encode_number!(serialize_u8, u8);
    encode_number!(serialize_u16, u16);
    encode_number!(serialize_u32, u32);
    encode_number!(serialize_u64, u64);
    encode_number!(serialize_u128, u128);

    // Zero and negative zero compare equal, so they must encode the same.
    fn serialize_f32(self, v: f32) -> Result<(), Unencodable> {
        let v = if v == 0.0 { 0.0f32 } else { v };
        self.sink.put(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_f64(self, v: f64) -> Result<(), Unencodable> {
        let v = if v == 0.0 { 0.0f64 } else { v };
        self.sink.put(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), Unencodable> {
        let mut buf = [0; 4];
        self.sink.put(v.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }

    fn serialize_str(self, v: &str) -> Result<(), Unencodable> {
        self.sink.put(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<(), Unencodable> {
        Err(Unencodable::Indirection("byte buffer"))
    }

    fn serialize_none(self) -> Result<(), Unencodable> {
        self.sink.put(&[0]);
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), Unencodable> {
        self.sink.put(&[1]);
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), Unencodable> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), Unencodable> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), Unencodable> {
        self.variant(variant_index);
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), Unencodable> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), Unencodable> {
        self.variant(variant_index);
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Unencodable> {
        Err(Unencodable::Indirection("sequence"))
    }

    // Fixed-size arrays serialize as tuples, so they end up here and are fine.
    fn serialize_tuple(self, _len: usize) -> Result<Self, Unencodable> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self, Unencodable> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, Unencodable> {
        self.variant(variant_index);
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Unencodable> {
        Err(Unencodable::Indirection("map"))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, Unencodable> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, Unencodable> {
        self.variant(variant_index);
        Ok(self)
    }
}

impl<S: Sink> ser::SerializeTuple for &mut KeyEncoder<S> {
    type Ok = ();
    type Error = Unencodable;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Unencodable> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Unencodable> {
        Ok(())
    }
}

impl<S: Sink> ser::SerializeTupleStruct for &mut KeyEncoder<S> {
    type Ok = ();
    type Error = Unencodable;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Unencodable> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Unencodable> {
        Ok(())
    }
}

impl<S: Sink> ser::SerializeTupleVariant for &mut KeyEncoder<S> {
    type Ok = ();
    type Error = Unencodable;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Unencodable> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Unencodable> {
        Ok(())
    }
}

impl<S: Sink> ser::SerializeStruct for &mut KeyEncoder<S> {
    type Ok = ();
    type Error = Unencodable;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Unencodable> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Unencodable> {
        Ok(())
    }
}

impl<S: Sink> ser::SerializeStructVariant for &mut KeyEncoder<S> {
    type Ok = ();
    type Error = Unencodable;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), Unencodable> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), Unencodable> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{hash_map::DefaultHasher, BTreeSet, HashMap};

    use assert_matches::assert_matches;
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Point {
        x: i32,
        y: f32,
    }

    #[derive(Serialize)]
    struct Tagged {
        tag: &'static str,
        data: Vec<u8>,
    }

    #[derive(Serialize)]
    enum Shape {
        Dot,
        Circle(u8),
        Rect { w: u8, h: u8 },
    }

    #[test]
    fn scalars() {
        assert_eq!(encode(&true).unwrap(), [1]);
        assert_eq!(encode(&-1i8).unwrap(), [0xff]);
        assert_eq!(encode(&0x0102_0304u32).unwrap(), [4, 3, 2, 1]);
        assert_eq!(encode(&1.5f64).unwrap(), 1.5f64.to_le_bytes());
        assert_eq!(encode(&'é').unwrap(), "é".as_bytes());
    }

    #[test]
    fn strings_are_raw_bytes() {
        assert_eq!(encode("kawonka").unwrap(), b"kawonka");
        assert_eq!(encode(&String::from("kawonka")).unwrap(), b"kawonka");
    }

    #[test]
    fn equal_floats_encode_equally() {
        assert_eq!(encode(&0.0f64).unwrap(), encode(&-0.0f64).unwrap());
        assert_eq!(encode(&0.0f32).unwrap(), encode(&-0.0f32).unwrap());
    }

    #[test]
    fn composites() {
        assert_eq!(encode(&[0f32; 12]).unwrap().len(), 48);
        assert_eq!(encode(&Point { x: 1, y: 0.0 }).unwrap().len(), 8);
        assert_eq!(encode(&(1u8, "ab", ())).unwrap(), b"\x01ab");
        assert_eq!(encode(&Some(2u8)).unwrap(), [1, 2]);
        assert_eq!(encode(&None::<u8>).unwrap(), [0]);

        assert_eq!(encode(&Shape::Dot).unwrap(), [0, 0, 0, 0]);
        assert_eq!(encode(&Shape::Circle(7)).unwrap(), [1, 0, 0, 0, 7]);
        assert_eq!(
            encode(&Shape::Rect { w: 1, h: 2 }).unwrap(),
            [2, 0, 0, 0, 1, 2]
        );
    }

    #[test]
    fn indirections_are_rejected() {
        assert_matches!(
            encode(&vec![0f32; 12]),
            Err(KeyTypeError {
                reason: Unencodable::Indirection("sequence"),
                ..
            })
        );
        assert_matches!(
            encode(&[0f32; 12][..]),
            Err(KeyTypeError {
                reason: Unencodable::Indirection("sequence"),
                ..
            })
        );
        assert_matches!(
            encode(&HashMap::<i32, i32>::new()),
            Err(KeyTypeError {
                reason: Unencodable::Indirection("map"),
                ..
            })
        );
        assert_matches!(
            encode(&BTreeSet::<i32>::new()),
            Err(KeyTypeError {
                reason: Unencodable::Indirection("sequence"),
                ..
            })
        );

        let err = encode(&Tagged {
            tag: "a",
            data: vec![],
        })
        .unwrap_err();
        assert!(err.type_name.ends_with("Tagged"));
        assert_eq!(
            err.to_string(),
            format!(
                "a value of type `{}` can't be used as a map key: it contains a sequence, \
                 which has no fixed value representation",
                err.type_name
            )
        );
    }

    #[test]
    fn hashing_matches_encoding() {
        let mut direct = DefaultHasher::new();
        encode_into(&("ab", 3u64), &mut direct).unwrap();

        let mut buffered = DefaultHasher::new();
        buffered.write(&encode(&("ab", 3u64)).unwrap());

        assert_eq!(direct.finish(), buffered.finish());
    }
}
