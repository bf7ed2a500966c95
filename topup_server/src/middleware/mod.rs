mod operator_key;

pub use operator_key::{OperatorKeyMiddlewareFactory, OperatorKeyMiddlewareService, OPERATOR_KEY_HEADER};
