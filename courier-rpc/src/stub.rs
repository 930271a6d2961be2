//! Typed argument lists and client stubs

use crate::client::RpcClient;
use crate::serializer::SerializerKind;
use courier_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// An argument list that can be encoded one argument at a time
pub trait EncodeArgs {
    fn encode_args(&self, serializer: SerializerKind) -> Result<Vec<Vec<u8>>>;
}

/// An argument list that can be rebuilt from per-argument encodings
pub trait DecodeArgs: Sized {
    const ARITY: usize;

    fn decode_args(args: &[Vec<u8>], serializer: SerializerKind) -> Result<Self>;
}

macro_rules! impl_args {
    ($arity:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name: Serialize),*> EncodeArgs for ($($name,)*) {
            #[allow(unused_variables)]
            fn encode_args(&self, serializer: SerializerKind) -> Result<Vec<Vec<u8>>> {
                Ok(vec![$(serializer.serialize(&self.$idx)?),*])
            }
        }

        impl<$($name: DeserializeOwned),*> DecodeArgs for ($($name,)*) {
            const ARITY: usize = $arity;

            #[allow(unused_variables)]
            fn decode_args(args: &[Vec<u8>], serializer: SerializerKind) -> Result<Self> {
                if args.len() != $arity {
                    return Err(Error::InvalidArgument(format!(
                        "Expected {} arguments, got {}",
                        $arity,
                        args.len()
                    )));
                }
                Ok(($(serializer.deserialize::<$name>(&args[$idx])?,)*))
            }
        }
    };
}

impl_args!(0;);
impl_args!(1; A: 0);
impl_args!(2; A: 0, B: 1);
impl_args!(3; A: 0, B: 1, C: 2);
impl_args!(4; A: 0, B: 1, C: 2, D: 3);

/// Calls methods of one remote interface through an [`RpcClient`]
#[derive(Clone)]
pub struct ServiceProxy {
    client: Arc<RpcClient>,
    interface: String,
}

impl ServiceProxy {
    pub fn new(client: Arc<RpcClient>, interface: impl Into<String>) -> Self {
        Self {
            client,
            interface: interface.into(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Invoke `method` with the given parameter type descriptors and arguments
    pub async fn call<A, R>(&self, method: &str, param_types: &[&str], args: A) -> Result<R>
    where
        A: EncodeArgs,
        R: DeserializeOwned,
    {
        self.client
            .invoke(&self.interface, method, param_types, args)
            .await
    }
}

/// A typed client for one remote interface.
///
/// ```ignore
/// struct HelloClient(ServiceProxy);
///
/// impl ClientStub for HelloClient {
///     const INTERFACE: &'static str = "HelloService";
///     fn from_proxy(proxy: ServiceProxy) -> Self { HelloClient(proxy) }
/// }
///
/// impl HelloClient {
///     async fn hello(&self, object: HelloObject) -> Result<String> {
///         self.0.call("hello", &["HelloObject"], (object,)).await
///     }
/// }
/// ```
pub trait ClientStub: Sized {
    const INTERFACE: &'static str;

    fn from_proxy(proxy: ServiceProxy) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_pair() {
        let serializer = SerializerKind::Json;
        let encoded = ("alice".to_string(), 42u32).encode_args(serializer).unwrap();
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0], b"\"alice\"");

        let (name, age) = <(String, u32)>::decode_args(&encoded, serializer).unwrap();
        assert_eq!(name, "alice");
        assert_eq!(age, 42);
    }

    #[test]
    fn test_empty_arguments() {
        let encoded = ().encode_args(SerializerKind::Bincode).unwrap();
        assert!(encoded.is_empty());
        <()>::decode_args(&encoded, SerializerKind::Bincode).unwrap();
        assert_eq!(<()>::ARITY, 0);
    }

    #[test]
    fn test_arity_mismatch() {
        let encoded = (1u8,).encode_args(SerializerKind::MessagePack).unwrap();
        let result = <(u8, u8)>::decode_args(&encoded, SerializerKind::MessagePack);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_four_arguments() {
        let serializer = SerializerKind::Bincode;
        let encoded = (1u8, 2u16, "three".to_string(), vec![4u32])
            .encode_args(serializer)
            .unwrap();
        let decoded = <(u8, u16, String, Vec<u32>)>::decode_args(&encoded, serializer).unwrap();
        assert_eq!(decoded, (1, 2, "three".to_string(), vec![4]));
    }
}
