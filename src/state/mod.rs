pub mod mapped;
pub mod paging;
pub mod transform;

pub use mapped::MappedState;
pub use paging::{PageResult, VersionedEntity};
pub use transform::{
    AesGcmTransformer, Codec, IdentityKeys, KeyTransformer, Pipeline, PrefixKeyTransformer,
    ValueTransformer,
};
