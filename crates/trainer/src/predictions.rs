//! Inference output normalisation

use runtime_core::{Error, Result, Tensor};
use serde_json::{Number, Value};

/// What an inference hook may return
#[derive(Debug, Clone, PartialEq)]
pub enum InferOutput {
    /// Shaped tensor; returned as nested lists following its shape
    Tensor(Tensor),

    /// Nested numeric array; must be rectangular and contain only numbers
    Array(Value),

    /// Flat list of predictions
    List(Vec<f64>),
}

/// Turn a hook result into the JSON list sent back to the caller
pub fn into_predictions(output: InferOutput) -> Result<Value> {
    match output {
        InferOutput::Tensor(tensor) => tensor_to_value(&tensor),
        InferOutput::Array(value) => {
            check_numeric_array(&value)?;
            Ok(value)
        }
        InferOutput::List(values) => values
            .into_iter()
            .map(number)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
    }
}

fn unsupported(found: impl Into<String>) -> Error {
    Error::UnsupportedOutputFormat {
        found: found.into(),
    }
}

fn number(x: f64) -> Result<Value> {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| unsupported(format!("non-finite prediction {}", x)))
}

fn tensor_to_value(tensor: &Tensor) -> Result<Value> {
    if !tensor.is_consistent() {
        return Err(unsupported("tensor whose data does not match its shape"));
    }

    // a 0-d tensor is still answered as a list
    if tensor.shape().is_empty() {
        return Ok(Value::Array(vec![number(tensor.data()[0] as f64)?]));
    }

    fn nest(shape: &[usize], data: &[f32]) -> Result<Value> {
        match shape {
            [] => number(data[0] as f64),
            [_] => data
                .iter()
                .map(|&x| number(x as f64))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            [dim, rest @ ..] => {
                let stride: usize = rest.iter().product();
                (0..*dim)
                    .map(|i| nest(rest, &data[i * stride..(i + 1) * stride]))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }

    nest(tensor.shape(), tensor.data())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shape of a rectangular numeric array, or an error naming the offending part
fn check_numeric_array(value: &Value) -> Result<Vec<usize>> {
    let items = match value {
        Value::Array(items) => items,
        other => return Err(unsupported(kind_of(other))),
    };

    let mut inner: Option<Vec<usize>> = None;
    for item in items {
        let shape = match item {
            Value::Number(_) => Vec::new(),
            Value::Array(_) => check_numeric_array(item)?,
            other => return Err(unsupported(format!("array containing {}", kind_of(other)))),
        };
        match &inner {
            None => inner = Some(shape),
            Some(expected) if *expected == shape => {}
            Some(_) => return Err(unsupported("ragged array")),
        }
    }

    let mut shape = vec![items.len()];
    shape.extend(inner.unwrap_or_default());
    Ok(shape)
}
