mod decode;
mod encode;

pub use self::decode::{Value, ValueInner};
pub use self::encode::ToMysqlValue;
