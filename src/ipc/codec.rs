//! Wire codec for the daemon protocol.
//!
//! The encoding is textual and length-prefixed: integers, floats and booleans
//! are written as decimal text followed by a single space delimiter; strings
//! and byte blobs as their byte length (decimal text), the raw bytes, then a
//! delimiter; sequences and maps as an element count followed by the elements;
//! struct and tuple fields back to back with no count; enum values as the
//! variant index followed by the variant's content. Options are a 0/1 flag
//! followed by the value when present.
//!
//! The format is endianness-agnostic and requires no schema negotiation. It is
//! implemented as a serde data format so payload types stay plain derived
//! structs. Self-describing deserialization is unsupported: both ends must
//! agree on the type being transferred.

use serde::de::{self, DeserializeOwned, IntoDeserializer};
use serde::{ser, Serialize};
use std::fmt::Display;
use std::io::{ErrorKind, Read, Write};
use thiserror::Error;

const DELIMITER: u8 = b' ';

/// Upper bound on any single length prefix. Guards against a corrupt or
/// hostile peer causing an enormous allocation.
const MAX_FIELD_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o failure on underlying stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream")]
    Eof,

    #[error("malformed length prefix: {0}")]
    InvalidLength(String),

    #[error("malformed numeric value: {0}")]
    InvalidNumber(String),

    #[error("field data was not valid UTF-8")]
    InvalidUtf8,

    #[error("missing delimiter after field data")]
    MissingDelimiter,

    #[error("wire format does not support {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Message(String),
}

impl ser::Error for CodecError {
    fn custom<T: Display>(msg: T) -> Self {
        CodecError::Message(msg.to_string())
    }
}

impl de::Error for CodecError {
    fn custom<T: Display>(msg: T) -> Self {
        CodecError::Message(msg.to_string())
    }
}

/// Serialize a value to its wire representation.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    value.serialize(&mut Serializer { writer: &mut buf })?;
    Ok(buf)
}

/// Deserialize a value directly from a stream, consuming exactly the bytes
/// that make up one value.
pub fn from_reader<T: DeserializeOwned, R: Read>(reader: R) -> Result<T, CodecError> {
    let mut de = Deserializer { reader };
    T::deserialize(&mut de)
}

pub struct Serializer<W: Write> {
    writer: W,
}

impl<W: Write> Serializer<W> {
    fn write_display<T: Display>(&mut self, value: T) -> Result<(), CodecError> {
        write!(self.writer, "{} ", value)?;
        Ok(())
    }

    fn write_prefixed(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.write_display(data.len())?;
        self.writer.write_all(data)?;
        self.writer.write_all(&[DELIMITER])?;
        Ok(())
    }
}

impl<'a, W: Write> ser::Serializer for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, v: bool) -> Result<(), CodecError> {
        self.write_display(if v { 1 } else { 0 })
    }

    fn serialize_i8(self, v: i8) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_i16(self, v: i16) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_i32(self, v: i32) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_i64(self, v: i64) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_i128(self, v: i128) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_u8(self, v: u8) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_u16(self, v: u16) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_u32(self, v: u32) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_u64(self, v: u64) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_u128(self, v: u128) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_f32(self, v: f32) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_f64(self, v: f64) -> Result<(), CodecError> {
        self.write_display(v)
    }

    fn serialize_char(self, v: char) -> Result<(), CodecError> {
        let mut buf = [0u8; 4];
        self.serialize_str(v.encode_utf8(&mut buf))
    }

    fn serialize_str(self, v: &str) -> Result<(), CodecError> {
        self.write_prefixed(v.as_bytes())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), CodecError> {
        self.write_prefixed(v)
    }

    fn serialize_none(self) -> Result<(), CodecError> {
        self.write_display(0)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), CodecError> {
        self.write_display(1)?;
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), CodecError> {
        self.write_display(variant_index)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        self.write_display(variant_index)?;
        value.serialize(self)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self, CodecError> {
        let len = len.ok_or(CodecError::Unsupported("sequences of unknown length"))?;
        self.write_display(len)?;
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, CodecError> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self, CodecError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, CodecError> {
        self.write_display(variant_index)?;
        Ok(self)
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self, CodecError> {
        let len = len.ok_or(CodecError::Unsupported("maps of unknown length"))?;
        self.write_display(len)?;
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, CodecError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, CodecError> {
        self.write_display(variant_index)?;
        Ok(self)
    }
}

impl<'a, W: Write> ser::SerializeSeq for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeTuple for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeTupleStruct for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeTupleVariant for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeMap for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), CodecError> {
        key.serialize(&mut **self)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeStruct for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeStructVariant for &'a mut Serializer<W> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

pub struct Deserializer<R: Read> {
    reader: R,
}

impl<R: Read> Deserializer<R> {
    fn read_byte(&mut self) -> Result<Option<u8>, CodecError> {
        let mut buf = [0u8; 1];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read bytes up to (and consuming) the next delimiter.
    fn read_token(&mut self) -> Result<String, CodecError> {
        let mut buf = Vec::new();
        loop {
            match self.read_byte()? {
                None => return Err(CodecError::Eof),
                Some(DELIMITER) => break,
                Some(b) => buf.push(b),
            }
        }
        String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8)
    }

    fn read_unsigned(&mut self) -> Result<u64, CodecError> {
        let token = self.read_token()?;
        token.parse().map_err(|_| CodecError::InvalidNumber(token))
    }

    fn read_signed(&mut self) -> Result<i64, CodecError> {
        let token = self.read_token()?;
        token.parse().map_err(|_| CodecError::InvalidNumber(token))
    }

    fn read_float(&mut self) -> Result<f64, CodecError> {
        let token = self.read_token()?;
        token.parse().map_err(|_| CodecError::InvalidNumber(token))
    }

    fn read_length(&mut self) -> Result<usize, CodecError> {
        let token = self.read_token()?;
        let len: u64 = token
            .parse()
            .map_err(|_| CodecError::InvalidLength(token.clone()))?;
        if len > MAX_FIELD_SIZE {
            return Err(CodecError::InvalidLength(format!(
                "{} exceeds maximum of {}",
                len, MAX_FIELD_SIZE
            )));
        }
        Ok(len as usize)
    }

    /// Read a length prefix, that many raw bytes, and the trailing delimiter.
    fn read_prefixed(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_length()?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                CodecError::Eof
            } else {
                CodecError::Io(e)
            }
        })?;
        match self.read_byte()? {
            Some(DELIMITER) => Ok(buf),
            Some(_) => Err(CodecError::MissingDelimiter),
            None => Err(CodecError::Eof),
        }
    }
}

macro_rules! deserialize_signed {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
            let v = self.read_signed()?;
            let v = <$ty>::try_from(v).map_err(|_| CodecError::InvalidNumber(v.to_string()))?;
            visitor.$visit(v)
        }
    };
}

macro_rules! deserialize_unsigned {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
            let v = self.read_unsigned()?;
            let v = <$ty>::try_from(v).map_err(|_| CodecError::InvalidNumber(v.to_string()))?;
            visitor.$visit(v)
        }
    };
}

impl<'de, 'a, R: Read> de::Deserializer<'de> for &'a mut Deserializer<R> {
    type Error = CodecError;

    fn deserialize_any<V: de::Visitor<'de>>(self, _visitor: V) -> Result<V::Value, CodecError> {
        Err(CodecError::Unsupported("self-describing deserialization"))
    }

    fn deserialize_bool<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_bool(self.read_signed()? != 0)
    }

    deserialize_signed!(deserialize_i8, visit_i8, i8);
    deserialize_signed!(deserialize_i16, visit_i16, i16);
    deserialize_signed!(deserialize_i32, visit_i32, i32);

    fn deserialize_i64<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_i64(self.read_signed()?)
    }

    fn deserialize_i128<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let token = self.read_token()?;
        let v: i128 = token.parse().map_err(|_| CodecError::InvalidNumber(token))?;
        visitor.visit_i128(v)
    }

    deserialize_unsigned!(deserialize_u8, visit_u8, u8);
    deserialize_unsigned!(deserialize_u16, visit_u16, u16);
    deserialize_unsigned!(deserialize_u32, visit_u32, u32);

    fn deserialize_u64<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_u64(self.read_unsigned()?)
    }

    fn deserialize_u128<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let token = self.read_token()?;
        let v: u128 = token.parse().map_err(|_| CodecError::InvalidNumber(token))?;
        visitor.visit_u128(v)
    }

    fn deserialize_f32<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_f32(self.read_float()? as f32)
    }

    fn deserialize_f64<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_f64(self.read_float()?)
    }

    fn deserialize_char<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let raw = self.read_prefixed()?;
        let s = String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(CodecError::Message(
                "expected a single-character string".into(),
            )),
        }
    }

    fn deserialize_str<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let raw = self.read_prefixed()?;
        let s = String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        visitor.visit_string(s)
    }

    fn deserialize_bytes<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_byte_buf(self.read_prefixed()?)
    }

    fn deserialize_option<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self.read_unsigned()? {
            0 => visitor.visit_none(),
            1 => visitor.visit_some(self),
            other => Err(CodecError::InvalidNumber(other.to_string())),
        }
    }

    fn deserialize_unit<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let count = self.read_length()?;
        visitor.visit_seq(CountedAccess {
            de: self,
            remaining: count,
        })
    }

    fn deserialize_tuple<V: de::Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(CountedAccess {
            de: self,
            remaining: len,
        })
    }

    fn deserialize_tuple_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(CountedAccess {
            de: self,
            remaining: len,
        })
    }

    fn deserialize_map<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let count = self.read_length()?;
        visitor.visit_map(CountedAccess {
            de: self,
            remaining: count,
        })
    }

    fn deserialize_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(CountedAccess {
            de: self,
            remaining: fields.len(),
        })
    }

    fn deserialize_enum<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_enum(EnumAccess { de: self })
    }

    fn deserialize_identifier<V: de::Visitor<'de>>(
        self,
        _visitor: V,
    ) -> Result<V::Value, CodecError> {
        Err(CodecError::Unsupported("field identifiers"))
    }

    fn deserialize_ignored_any<V: de::Visitor<'de>>(
        self,
        _visitor: V,
    ) -> Result<V::Value, CodecError> {
        Err(CodecError::Unsupported("ignored values"))
    }
}

struct CountedAccess<'a, R: Read> {
    de: &'a mut Deserializer<R>,
    remaining: usize,
}

impl<'de, 'a, R: Read> de::SeqAccess<'de> for CountedAccess<'a, R> {
    type Error = CodecError;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, CodecError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

impl<'de, 'a, R: Read> de::MapAccess<'de> for CountedAccess<'a, R> {
    type Error = CodecError;

    fn next_key_seed<K: de::DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, CodecError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, CodecError> {
        seed.deserialize(&mut *self.de)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

struct EnumAccess<'a, R: Read> {
    de: &'a mut Deserializer<R>,
}

impl<'de, 'a, R: Read> de::EnumAccess<'de> for EnumAccess<'a, R> {
    type Error = CodecError;
    type Variant = Self;

    fn variant_seed<V: de::DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self), CodecError> {
        let raw = self.de.read_unsigned()?;
        let index =
            u32::try_from(raw).map_err(|_| CodecError::InvalidNumber(raw.to_string()))?;
        let value =
            seed.deserialize(IntoDeserializer::<CodecError>::into_deserializer(index))?;
        Ok((value, self))
    }
}

impl<'de, 'a, R: Read> de::VariantAccess<'de> for EnumAccess<'a, R> {
    type Error = CodecError;

    fn unit_variant(self) -> Result<(), CodecError> {
        Ok(())
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, CodecError> {
        seed.deserialize(&mut *self.de)
    }

    fn tuple_variant<V: de::Visitor<'de>>(
        self,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(CountedAccess {
            de: self.de,
            remaining: len,
        })
    }

    fn struct_variant<V: de::Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_seq(CountedAccess {
            de: self.de,
            remaining: fields.len(),
        })
    }
}
