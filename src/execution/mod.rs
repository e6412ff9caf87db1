pub mod context;
pub mod predictor;
pub mod tensor;
