use bytes::{Bytes, BytesMut};
use proptest::prelude::*;

use confidential_inference_client::tensor::codec::{
    decode_tensor_file, decode_tensor_map, encode_tensor, encode_tensor_file, encode_tensor_map,
};
use confidential_inference_client::{DType, Tensor, TensorMap};

// Any supported dtype.
fn arb_dtype() -> impl Strategy<Value = DType> {
    prop::sample::select(DType::ALL.to_vec())
}

// Up to 4 dimensions, small enough to keep cases fast.
fn arb_shape() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..6, 0..=4)
}

// A tensor with arbitrary raw element bytes (NaN payloads included for floats).
fn arb_tensor() -> impl Strategy<Value = Tensor> {
    (arb_dtype(), arb_shape()).prop_flat_map(|(dtype, shape)| {
        let len = shape.iter().product::<u32>() as usize * dtype.element_size();
        prop::collection::vec(any::<u8>(), len)
            .prop_map(move |data| Tensor::new(dtype, shape.clone(), Bytes::from(data)).unwrap())
    })
}

fn arb_tensor_map() -> impl Strategy<Value = TensorMap> {
    prop::collection::btree_map("[a-zA-Z_][a-zA-Z0-9_:./]{0,40}", arb_tensor(), 0..6)
}

proptest! {
    #[test]
    fn tensor_map_is_bit_exact(map in arb_tensor_map()) {
        let encoded = encode_tensor_map(&map).unwrap();
        let decoded = decode_tensor_map(encoded).unwrap();

        prop_assert_eq!(decoded.len(), map.len());
        for (name, tensor) in &map {
            let got = &decoded[name];
            prop_assert_eq!(got.dtype(), tensor.dtype());
            prop_assert_eq!(got.shape(), tensor.shape());
            prop_assert_eq!(got.data(), tensor.data());
        }
    }

    #[test]
    fn tensor_file_is_bit_exact(name in "[a-z]{1,16}", tensor in arb_tensor()) {
        let encoded = encode_tensor_file(&name, &tensor).unwrap();
        let (got_name, got) = decode_tensor_file(encoded).unwrap();
        prop_assert_eq!(got_name, name);
        prop_assert_eq!(got, tensor);
    }

    #[test]
    fn sub_headers_are_aligned(name in "[a-z]{0,20}", tensor in arb_tensor()) {
        let mut buf = BytesMut::new();
        encode_tensor(&name, &tensor, &mut buf).unwrap();
        let header = buf.len() - tensor.data().len();
        prop_assert_eq!(header % 8, 0);
    }

    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_tensor_map(Bytes::from(data.clone()));
        let _ = decode_tensor_file(Bytes::from(data));
    }

    #[test]
    fn truncation_is_detected(map in arb_tensor_map(), cut in 1usize..64) {
        let encoded = encode_tensor_map(&map).unwrap();
        prop_assume!(cut <= encoded.len());
        let truncated = encoded.slice(..encoded.len() - cut);
        prop_assert!(decode_tensor_map(truncated).is_err());
    }
}

#[test]
fn empty_map_encodes_to_count_only() {
    let encoded = encode_tensor_map(&TensorMap::new()).unwrap();
    assert_eq!(&encoded[..], &[0, 0, 0, 0]);
    assert!(decode_tensor_map(encoded).unwrap().is_empty());
}
