use crate::kernel::{dequantize_int4_tensor, int4_gemv_tensor, int4_gemv::TILE_WIDTH};
use crate::quant::{QuantizedWeight, SUPPORTED_GROUP_SIZES};
use burn::{
    module::{Param, ParamId},
    prelude::*,
};
use burn_cubecl::{BoolElement, CubeBackend, CubeRuntime, FloatElement, IntElement};
use burn_tensor::{Int, TensorData, TensorPrimitive};

/// 4-bit codes per packed 32-bit word.
const PACK_FACTOR: usize = 8;
/// Smallest contraction stride the kernel supports (32 lanes × 4).
const MIN_JUMP: usize = 128;

#[derive(Clone, Debug)]
pub struct Int4LinearConfig {
    d_input: usize,
    d_output: usize,
    group_size: usize,
    bias: bool,
}

impl Int4LinearConfig {
    pub fn new(d_input: usize, d_output: usize, group_size: usize) -> Self {
        Self {
            d_input,
            d_output,
            group_size,
            bias: false,
        }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    fn check(&self) {
        assert!(
            SUPPORTED_GROUP_SIZES.contains(&self.group_size),
            "group_size must be one of {SUPPORTED_GROUP_SIZES:?}"
        );
        assert!(
            self.d_output.is_multiple_of(TILE_WIDTH),
            "d_output must be divisible by {TILE_WIDTH}"
        );
        assert!(
            self.d_input.is_multiple_of(MIN_JUMP),
            "d_input must be divisible by {MIN_JUMP}"
        );
        assert!(
            self.d_input.is_multiple_of(self.group_size),
            "d_input must be divisible by group_size"
        );
    }

    pub fn build<B: Backend>(&self, device: &Device<B>) -> Int4Linear<B> {
        self.check();

        let num_groups = self.d_input / self.group_size;
        let qweight = Param::initialized(
            ParamId::new(),
            Tensor::<B, 2, Int>::empty([self.d_output, self.d_input / PACK_FACTOR], device),
        );
        let scales = Param::initialized(
            ParamId::new(),
            Tensor::<B, 2>::empty([num_groups, self.d_output], device),
        );
        let zeros = Param::initialized(
            ParamId::new(),
            Tensor::<B, 2>::empty([num_groups, self.d_output], device),
        );
        let bias = self.bias.then(|| {
            Param::initialized(
                ParamId::new(),
                Tensor::<B, 1>::zeros([self.d_output], device),
            )
        });

        Int4Linear {
            qweight,
            scales,
            zeros,
            bias,
        }
    }
}

/// Linear layer with int4 group-quantized weights, evaluated one token at a time.
#[derive(Debug, Module)]
pub struct Int4Linear<B: Backend> {
    qweight: Param<Tensor<B, 2, Int>>,
    scales: Param<Tensor<B, 2, Float>>,
    zeros: Param<Tensor<B, 2, Float>>,
    bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> Int4Linear<B> {
    /// Loads host-quantized weights.
    pub fn from_quantized(weight: &QuantizedWeight, bias: Option<Vec<f32>>, device: &Device<B>) -> Self {
        Int4LinearConfig::new(weight.k, weight.n, weight.group_size).check();

        let num_groups = weight.num_groups();
        let words: Vec<i32> = weight
            .packed_words()
            .into_iter()
            .map(|w| w as i32)
            .collect();

        let qweight = Tensor::<B, 2, Int>::from_data(
            TensorData::new(words, [weight.n, weight.k / PACK_FACTOR]),
            device,
        );
        let scales = Tensor::<B, 2>::from_data(
            TensorData::new(weight.scales.clone(), [num_groups, weight.n]),
            device,
        );
        let zeros = Tensor::<B, 2>::from_data(
            TensorData::new(weight.zeros.clone(), [num_groups, weight.n]),
            device,
        );
        let bias = bias.map(|values| {
            assert_eq!(values.len(), weight.n, "bias must have d_output elements");
            Param::initialized(
                ParamId::new(),
                Tensor::<B, 1>::from_data(TensorData::new(values, [weight.n]), device),
            )
        });

        Self {
            qweight: Param::initialized(ParamId::new(), qweight),
            scales: Param::initialized(ParamId::new(), scales),
            zeros: Param::initialized(ParamId::new(), zeros),
            bias,
        }
    }

    pub fn group_size(&self) -> usize {
        let [num_groups, _] = self.scales.val().dims();
        self.d_input() / num_groups
    }

    pub fn d_input(&self) -> usize {
        self.qweight.val().dims()[1] * PACK_FACTOR
    }

    pub fn d_output(&self) -> usize {
        self.qweight.val().dims()[0]
    }
}

impl<R: CubeRuntime, I: IntElement, F: FloatElement, BT: BoolElement>
    Int4Linear<CubeBackend<R, F, I, BT>>
{
    /// Dense `[d_output, d_input]` weights.
    pub fn dequantize(&self) -> Tensor<CubeBackend<R, F, I, BT>, 2> {
        let primitive = dequantize_int4_tensor(
            self.qweight.val(),
            self.scales.val(),
            self.zeros.val(),
            self.group_size(),
        );
        Tensor::from_primitive(TensorPrimitive::Float(primitive))
    }

    /// `[.., 1, K] -> [.., 1, N]`; every leading dimension must be 1.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<CubeBackend<R, F, I, BT>, D>,
    ) -> Tensor<CubeBackend<R, F, I, BT>, D> {
        assert!(D >= 2, "input tensor must have at least 2 dims: [..., K]");

        let mut output_dims = input.dims();
        let k = output_dims[D - 1];
        let rows = input.shape().num_elements() / k.max(1);
        assert_eq!(rows, 1, "int4 linear decodes a single token, got {rows} rows");
        assert_eq!(k, self.d_input(), "input last dim (K) must match d_input");

        let n = self.d_output();
        let output = int4_gemv_tensor(
            input.reshape([1, k]),
            self.qweight.val(),
            self.scales.val(),
            self.zeros.val(),
            self.group_size(),
        );
        let output = Tensor::<CubeBackend<R, F, I, BT>, 2>::from_primitive(TensorPrimitive::Float(output));

        let output = match &self.bias {
            Some(bias) => output + bias.val().reshape([1, n]),
            None => output,
        };

        output_dims[D - 1] = n;
        output.reshape(output_dims)
    }
}
