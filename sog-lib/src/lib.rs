pub mod archive;
pub mod codebook;
pub mod column;
pub mod error;
pub mod gsplat;
pub mod kdtree;
pub mod kmeans;
pub mod layout;
pub mod ordering;
pub mod raster;
pub mod sog;
pub mod splat_encode;
pub mod tsplat;

pub use error::{Result, SogError};
pub use gsplat::{Gsplat, GsplatArray};
pub use kmeans::{Clusterer, Clustering, KMeans};
pub use layout::{CellLayout, IdentityLayout};
pub use sog::{decode_sog, decode_sog_reader, encode_sog, ShFlatten, SogDecoder, SogEncoder, SogMeta};
pub use tsplat::{Tsplat, TsplatArray};
