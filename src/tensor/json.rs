//! JSON form of a tensor map:
//! `{"<name>": {"type": "<numpy dtype name>", "values": <nested arrays>}}`.
//!
//! The shape is inferred from the nesting, which must be rectangular.

use serde_json::{Map, Value};

use super::{DType, Element, Tensor, TensorMap, MAX_NDIMS};
use crate::error::TensorError;

/// Parse a JSON object into a tensor map.
pub fn tensor_map_from_json(value: &Value) -> Result<TensorMap, TensorError> {
    let Value::Object(entries) = value else {
        return Err(json_err("<root>", "expected an object of named tensors"));
    };

    let mut map = TensorMap::new();
    for (name, entry) in entries {
        map.insert(name.clone(), tensor_from_json(name, entry)?);
    }
    Ok(map)
}

/// Render a tensor map as a JSON object.
pub fn tensor_map_to_json(map: &TensorMap) -> Result<Value, TensorError> {
    let mut out = Map::new();
    for (name, tensor) in map {
        let mut entry = Map::new();
        entry.insert("type".into(), Value::from(tensor.dtype().name()));
        entry.insert("values".into(), tensor_values(tensor)?);
        out.insert(name.clone(), Value::Object(entry));
    }
    Ok(Value::Object(out))
}

fn tensor_from_json(name: &str, entry: &Value) -> Result<Tensor, TensorError> {
    let dtype_name = entry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| json_err(name, "missing \"type\""))?;
    let dtype = DType::from_name(dtype_name)?;
    let values = entry
        .get("values")
        .ok_or_else(|| json_err(name, "missing \"values\""))?;

    let shape = infer_shape(name, values)?;
    let mut flat = Vec::new();
    flatten(name, values, &shape, &mut flat)?;

    match dtype {
        DType::F32 => build(name, shape, &flat, |v| v.as_f64().map(|f| f as f32)),
        DType::F64 => build(name, shape, &flat, Value::as_f64),
        DType::I8 => build(name, shape, &flat, int::<i8>),
        DType::I16 => build(name, shape, &flat, int::<i16>),
        DType::I32 => build(name, shape, &flat, int::<i32>),
        DType::I64 => build(name, shape, &flat, Value::as_i64),
        DType::U8 => build(name, shape, &flat, uint::<u8>),
        DType::U16 => build(name, shape, &flat, uint::<u16>),
        DType::U32 => build(name, shape, &flat, uint::<u32>),
        DType::U64 => build(name, shape, &flat, Value::as_u64),
        DType::Bool => build(name, shape, &flat, Value::as_bool),
    }
}

fn int<T: TryFrom<i64>>(v: &Value) -> Option<T> {
    v.as_i64().and_then(|i| T::try_from(i).ok())
}

fn uint<T: TryFrom<u64>>(v: &Value) -> Option<T> {
    v.as_u64().and_then(|i| T::try_from(i).ok())
}

fn build<T: Element>(
    name: &str,
    shape: Vec<u32>,
    flat: &[&Value],
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<Tensor, TensorError> {
    let values = flat
        .iter()
        .map(|&v| {
            convert(v).ok_or_else(|| {
                json_err(name, &format!("{v} is not a valid {}", T::DTYPE.name()))
            })
        })
        .collect::<Result<Vec<T>, _>>()?;
    Tensor::from_vec(shape, &values)
}

fn infer_shape(name: &str, mut value: &Value) -> Result<Vec<u32>, TensorError> {
    let mut shape = Vec::new();
    while let Value::Array(items) = value {
        if shape.len() == MAX_NDIMS {
            return Err(TensorError::TooManyDims(MAX_NDIMS + 1));
        }
        let len = u32::try_from(items.len()).map_err(|_| TensorError::ShapeOverflow)?;
        shape.push(len);
        match items.first() {
            Some(first) => value = first,
            None => break,
        }
    }
    if shape.is_empty() && !value.is_number() && !value.is_boolean() {
        return Err(json_err(name, "\"values\" must be a number, boolean or array"));
    }
    Ok(shape)
}

fn flatten<'a>(
    name: &str,
    value: &'a Value,
    shape: &[u32],
    out: &mut Vec<&'a Value>,
) -> Result<(), TensorError> {
    match (shape.split_first(), value) {
        (None, Value::Array(_)) => Err(json_err(name, "ragged nesting")),
        (None, scalar) => {
            out.push(scalar);
            Ok(())
        }
        (Some((&len, rest)), Value::Array(items)) if items.len() == len as usize => {
            for item in items {
                flatten(name, item, rest, out)?;
            }
            Ok(())
        }
        (Some(_), _) => Err(json_err(name, "ragged nesting")),
    }
}

fn tensor_values(tensor: &Tensor) -> Result<Value, TensorError> {
    let flat: Vec<Value> = match tensor.dtype() {
        DType::F32 => to_values(tensor.to_vec::<f32>()?, |v| Value::from(f64::from(v))),
        DType::F64 => to_values(tensor.to_vec::<f64>()?, Value::from),
        DType::I8 => to_values(tensor.to_vec::<i8>()?, Value::from),
        DType::I16 => to_values(tensor.to_vec::<i16>()?, Value::from),
        DType::I32 => to_values(tensor.to_vec::<i32>()?, Value::from),
        DType::I64 => to_values(tensor.to_vec::<i64>()?, Value::from),
        DType::U8 => to_values(tensor.to_vec::<u8>()?, Value::from),
        DType::U16 => to_values(tensor.to_vec::<u16>()?, Value::from),
        DType::U32 => to_values(tensor.to_vec::<u32>()?, Value::from),
        DType::U64 => to_values(tensor.to_vec::<u64>()?, Value::from),
        DType::Bool => to_values(tensor.to_vec::<bool>()?, Value::from),
    };
    Ok(nest(&mut flat.into_iter(), tensor.shape()))
}

fn to_values<T>(values: Vec<T>, f: impl Fn(T) -> Value) -> Vec<Value> {
    values.into_iter().map(f).collect()
}

fn nest(flat: &mut impl Iterator<Item = Value>, shape: &[u32]) -> Value {
    match shape.split_first() {
        None => flat.next().unwrap_or(Value::Null),
        Some((&len, rest)) => Value::Array((0..len).map(|_| nest(flat, rest)).collect()),
    }
}

fn json_err(name: &str, reason: &str) -> TensorError {
    TensorError::Json {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
