use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Copy a tensor to the host as `f32`, whatever the backend's float element is.
pub fn to_host_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
}

/// First element of a tensor on the host; NaN when the tensor is empty.
pub fn scalar_value<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f32 {
    to_host_vec(tensor).first().copied().unwrap_or(f32::NAN)
}
