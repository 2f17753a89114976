//! Wire form of a tensor map.
//!
//! ```text
//! count: u32 LE
//! per tensor:
//!   ndims: u16 LE | dtype: u8 | shape: ndims × u32 LE | name_len: u16 LE | name
//!   zero padding to 8-byte alignment of the sub-header
//!   data: product(shape) × element_size bytes, little-endian
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{DType, Tensor, TensorMap, MAX_NDIMS};
use crate::error::TensorError;

fn sub_header_len(ndims: usize, name_len: usize) -> usize {
    2 + 1 + ndims * 4 + 2 + name_len
}

fn padding_for(sub_header_len: usize) -> usize {
    (8 - (sub_header_len % 8)) % 8
}

/// Append one named tensor (sub-header + data) to `buf`.
pub fn encode_tensor(name: &str, tensor: &Tensor, buf: &mut BytesMut) -> Result<(), TensorError> {
    let name_bytes = name.as_bytes();
    let name_len =
        u16::try_from(name_bytes.len()).map_err(|_| TensorError::NameTooLong(name_bytes.len()))?;
    let shape = tensor.shape();

    let header_len = sub_header_len(shape.len(), name_bytes.len());
    let padding = padding_for(header_len);
    buf.reserve(header_len + padding + tensor.data().len());

    buf.put_u16_le(shape.len() as u16);
    buf.put_u8(tensor.dtype() as u8);
    for &dim in shape {
        buf.put_u32_le(dim);
    }
    buf.put_u16_le(name_len);
    buf.put_slice(name_bytes);
    buf.put_bytes(0, padding);
    buf.put_slice(tensor.data());
    Ok(())
}

/// Read one named tensor from the front of `buf`, advancing past it.
pub fn decode_tensor(buf: &mut Bytes) -> Result<(String, Tensor), TensorError> {
    if buf.remaining() < 3 {
        return Err(TensorError::IncompleteHeader);
    }
    let ndims = buf.get_u16_le() as usize;
    if ndims > MAX_NDIMS {
        return Err(TensorError::TooManyDims(ndims));
    }
    let dtype = DType::from_u8(buf.get_u8())?;

    if buf.remaining() < ndims * 4 + 2 {
        return Err(TensorError::IncompleteHeader);
    }
    let shape: Vec<u32> = (0..ndims).map(|_| buf.get_u32_le()).collect();

    let name_len = buf.get_u16_le() as usize;
    if buf.remaining() < name_len {
        return Err(TensorError::IncompleteHeader);
    }
    let name = String::from_utf8(buf.split_to(name_len).to_vec())?;

    let padding = padding_for(sub_header_len(ndims, name_len));
    if buf.remaining() < padding {
        return Err(TensorError::IncompleteHeader);
    }
    if buf.split_to(padding).iter().any(|&b| b != 0) {
        return Err(TensorError::InvalidPadding);
    }

    let data_len = super::expected_data_len(dtype, &shape)?;
    if buf.remaining() < data_len {
        return Err(TensorError::DataSizeMismatch {
            expected: data_len,
            actual: buf.remaining(),
        });
    }
    let data = buf.split_to(data_len);

    Ok((name, Tensor::new(dtype, shape, data)?))
}

/// Encode a tensor map into a single payload.
pub fn encode_tensor_map(map: &TensorMap) -> Result<Bytes, TensorError> {
    let total: usize = map.values().map(|t| t.data().len() + 64).sum();
    let mut buf = BytesMut::with_capacity(4 + total);
    buf.put_u32_le(map.len() as u32);
    for (name, tensor) in map {
        encode_tensor(name, tensor, &mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decode a payload produced by [`encode_tensor_map`]. The payload must be
/// consumed exactly.
pub fn decode_tensor_map(mut buf: Bytes) -> Result<TensorMap, TensorError> {
    if buf.remaining() < 4 {
        return Err(TensorError::IncompleteHeader);
    }
    let count = buf.get_u32_le();
    let mut map = TensorMap::new();
    for _ in 0..count {
        let (name, tensor) = decode_tensor(&mut buf)?;
        if map.contains_key(&name) {
            return Err(TensorError::DuplicateName(name));
        }
        map.insert(name, tensor);
    }
    if buf.has_remaining() {
        return Err(TensorError::TrailingBytes(buf.remaining()));
    }
    Ok(map)
}

/// Encode a single named tensor as a standalone file body.
pub fn encode_tensor_file(name: &str, tensor: &Tensor) -> Result<Bytes, TensorError> {
    let mut buf = BytesMut::new();
    encode_tensor(name, tensor, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode a standalone tensor file written by [`encode_tensor_file`].
pub fn decode_tensor_file(mut buf: Bytes) -> Result<(String, Tensor), TensorError> {
    let decoded = decode_tensor(&mut buf)?;
    if buf.has_remaining() {
        return Err(TensorError::TrailingBytes(buf.remaining()));
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> TensorMap {
        let mut map = TensorMap::new();
        map.insert(
            "hidden_state".into(),
            Tensor::from_vec(vec![2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        map.insert("mask".into(), Tensor::from_vec(vec![3], &[true, false, true]).unwrap());
        map
    }

    #[test]
    fn roundtrip_map() {
        let map = sample_map();
        let encoded = encode_tensor_map(&map).unwrap();
        let decoded = decode_tensor_map(encoded).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn data_is_aligned() {
        let mut buf = BytesMut::new();
        let t = Tensor::from_vec(vec![1], &[7u64]).unwrap();
        encode_tensor("abc", &t, &mut buf).unwrap();
        // 2 + 1 + 4 + 2 + 3 = 12 → 4 bytes of padding, then 8 data bytes.
        assert_eq!(buf.len(), 16 + 8);
        assert_eq!(&buf[12..16], &[0, 0, 0, 0]);
        assert_eq!(&buf[16..], &7u64.to_le_bytes());
    }

    #[test]
    fn empty_name_and_scalar() {
        let t = Tensor::from_vec(vec![], &[1.5f64]).unwrap();
        let encoded = encode_tensor_file("", &t).unwrap();
        let (name, decoded) = decode_tensor_file(encoded).unwrap();
        assert_eq!(name, "");
        assert_eq!(decoded, t);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut raw = BytesMut::from(&encode_tensor_map(&sample_map()).unwrap()[..]);
        raw.put_u8(0);
        assert!(matches!(
            decode_tensor_map(raw.freeze()),
            Err(TensorError::TrailingBytes(1))
        ));
    }

    #[test]
    fn duplicate_name_rejected() {
        let t = Tensor::from_vec(vec![1], &[1i32]).unwrap();
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        encode_tensor("x", &t, &mut buf).unwrap();
        encode_tensor("x", &t, &mut buf).unwrap();
        assert!(matches!(
            decode_tensor_map(buf.freeze()),
            Err(TensorError::DuplicateName(n)) if n == "x"
        ));
    }

    #[test]
    fn nonzero_padding_rejected() {
        let t = Tensor::from_vec(vec![1], &[1i32]).unwrap();
        let mut raw = BytesMut::from(&encode_tensor_file("x", &t).unwrap()[..]);
        // sub-header is 10 bytes; byte 10 is padding.
        raw[10] = 1;
        assert!(matches!(
            decode_tensor_file(raw.freeze()),
            Err(TensorError::InvalidPadding)
        ));
    }

    #[test]
    fn truncated_inputs_rejected() {
        let encoded = encode_tensor_map(&sample_map()).unwrap();
        for len in 0..encoded.len() {
            assert!(decode_tensor_map(encoded.slice(..len)).is_err(), "len {len}");
        }
    }

    #[test]
    fn unknown_dtype_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u32_le(1);
        raw.put_u16_le(0);
        raw.put_u8(16);
        assert!(matches!(
            decode_tensor_map(raw.freeze()),
            Err(TensorError::UnknownDType(16))
        ));
    }

    #[test]
    fn too_many_dims_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u16_le(33);
        raw.put_u8(DType::U8 as u8);
        assert!(matches!(
            decode_tensor_file(raw.freeze()),
            Err(TensorError::TooManyDims(33))
        ));
    }
}
