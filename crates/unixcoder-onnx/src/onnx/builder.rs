use candle_core::{DType, Tensor};

use super::proto::{
    attribute_type, tensor_shape_proto, type_proto, AttributeProto, DataType, GraphProto,
    ModelProto, NodeProto, OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto,
};
use crate::Result;

/// IR version paired with opset 14.
pub const IR_VERSION: i64 = 7;

/// One dimension of a graph input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Fixed(i64),
    /// Named symbolic dimension, free to vary between runs
    Dynamic(String),
}

impl Dim {
    pub fn dynamic(name: &str) -> Self {
        Dim::Dynamic(name.to_string())
    }

    fn to_proto(&self) -> tensor_shape_proto::Dimension {
        let value = match self {
            Dim::Fixed(size) => tensor_shape_proto::dimension::Value::DimValue(*size),
            Dim::Dynamic(name) => tensor_shape_proto::dimension::Value::DimParam(name.clone()),
        };
        tensor_shape_proto::Dimension {
            value: Some(value),
            denotation: String::new(),
        }
    }
}

pub fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        i: Some(value),
        r#type: attribute_type::INT,
        ..Default::default()
    }
}

pub fn attr_ints(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        ints: values.to_vec(),
        r#type: attribute_type::INTS,
        ..Default::default()
    }
}

pub fn attr_float(name: &str, value: f32) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        f: Some(value),
        r#type: attribute_type::FLOAT,
        ..Default::default()
    }
}

/// Accumulates nodes, initializers and graph signatures, handing out unique
/// value names as nodes are added.
pub struct GraphBuilder {
    name: String,
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    counter: usize,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            initializers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            counter: 0,
        }
    }

    fn fresh(&mut self, hint: &str) -> String {
        self.counter += 1;
        format!("{}_{}", hint, self.counter)
    }

    pub fn input(&mut self, name: &str, elem_type: DataType, dims: &[Dim]) -> String {
        self.inputs.push(value_info(name, elem_type, dims));
        name.to_string()
    }

    pub fn output(&mut self, name: &str, elem_type: DataType, dims: &[Dim]) {
        self.outputs.push(value_info(name, elem_type, dims));
    }

    pub fn initializer_f32(&mut self, name: &str, dims: &[i64], data: &[f32]) -> String {
        self.initializers.push(TensorProto {
            dims: dims.to_vec(),
            data_type: DataType::Float.code(),
            name: name.to_string(),
            raw_data: data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            doc_string: String::new(),
        });
        name.to_string()
    }

    pub fn initializer_i64(&mut self, name: &str, dims: &[i64], data: &[i64]) -> String {
        self.initializers.push(TensorProto {
            dims: dims.to_vec(),
            data_type: DataType::Int64.code(),
            name: name.to_string(),
            raw_data: data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            doc_string: String::new(),
        });
        name.to_string()
    }

    /// Copies a candle tensor into a float initializer of the same shape.
    pub fn tensor(&mut self, name: &str, tensor: &Tensor) -> Result<String> {
        let dims: Vec<i64> = tensor.dims().iter().map(|&d| d as i64).collect();
        let data = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(self.initializer_f32(name, &dims, &data))
    }

    /// Adds a single-output node and returns the name of its output.
    pub fn node(&mut self, op_type: &str, inputs: &[&str], attributes: Vec<AttributeProto>) -> String {
        let output = self.fresh(&op_type.to_lowercase());
        self.node_into(op_type, inputs, &output, attributes);
        output
    }

    /// Adds a node writing to an explicitly named output.
    pub fn node_into(&mut self, op_type: &str, inputs: &[&str], output: &str, attributes: Vec<AttributeProto>) {
        let name = format!("{}_node_{}", op_type, self.nodes.len());
        self.nodes.push(NodeProto {
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.to_string()],
            name,
            op_type: op_type.to_string(),
            attribute: attributes,
            doc_string: String::new(),
            domain: String::new(),
        });
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn build(self, opset: i64, producer_name: &str, producer_version: &str) -> ModelProto {
        ModelProto {
            ir_version: IR_VERSION,
            producer_name: producer_name.to_string(),
            producer_version: producer_version.to_string(),
            domain: String::new(),
            model_version: 1,
            doc_string: String::new(),
            graph: Some(GraphProto {
                node: self.nodes,
                name: self.name,
                initializer: self.initializers,
                doc_string: String::new(),
                input: self.inputs,
                output: self.outputs,
                value_info: Vec::new(),
            }),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: opset,
            }],
        }
    }
}

fn value_info(name: &str, elem_type: DataType, dims: &[Dim]) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: elem_type.code(),
                shape: Some(TensorShapeProto {
                    dim: dims.iter().map(Dim::to_proto).collect(),
                }),
            })),
            denotation: String::new(),
        }),
        doc_string: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use prost::Message;

    #[test]
    fn test_fresh_names_are_unique() {
        let mut g = GraphBuilder::new("test");
        let x = g.input("x", DataType::Float, &[Dim::dynamic("batch_size")]);
        let a = g.node("Relu", &[&x], vec![]);
        let b = g.node("Relu", &[&a], vec![]);
        assert_ne!(a, b);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn test_initializer_raw_data_is_little_endian() -> anyhow::Result<()> {
        let mut g = GraphBuilder::new("test");
        let t = Tensor::from_vec(vec![1.0f32, -2.0, 0.5, 4.0], (2, 2), &Device::Cpu)?;
        g.tensor("w", &t)?;
        g.initializer_i64("axes", &[1], &[-1]);

        let model = g.build(14, "test", "0");
        let graph = model.graph.unwrap();
        assert_eq!(graph.initializer[0].dims, vec![2, 2]);
        assert_eq!(graph.initializer[0].raw_data.len(), 16);
        assert_eq!(&graph.initializer[0].raw_data[4..8], &(-2.0f32).to_le_bytes());
        assert_eq!(graph.initializer[1].data_type, 7);
        assert_eq!(graph.initializer[1].raw_data, (-1i64).to_le_bytes().to_vec());
        Ok(())
    }

    #[test]
    fn test_zero_valued_attribute_is_encoded() -> anyhow::Result<()> {
        let attr = attr_int("keepdims", 0);
        let bytes = attr.encode_to_vec();
        let decoded = AttributeProto::decode(bytes.as_slice())?;
        assert_eq!(decoded.i, Some(0));
        assert_eq!(decoded.r#type, attribute_type::INT);
        Ok(())
    }

    #[test]
    fn test_model_round_trips_through_protobuf() -> anyhow::Result<()> {
        let mut g = GraphBuilder::new("test");
        let x = g.input("x", DataType::Int64, &[Dim::dynamic("batch_size"), Dim::Fixed(3)]);
        g.node_into("Identity", &[&x], "y", vec![attr_float("alpha", 0.5)]);
        g.output("y", DataType::Int64, &[Dim::dynamic("batch_size"), Dim::Fixed(3)]);

        let model = g.build(14, "unixcoder-onnx", "0.1.0");
        let decoded = ModelProto::decode(model.encode_to_vec().as_slice())?;
        assert_eq!(decoded, model);
        assert_eq!(decoded.ir_version, IR_VERSION);
        assert_eq!(decoded.opset_import[0].version, 14);
        Ok(())
    }
}
