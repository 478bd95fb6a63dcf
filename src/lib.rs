pub mod tag;
pub mod codec;
pub mod io_stream;
pub mod chunk;
pub mod index;
pub mod alloc;
pub mod region;
pub mod recovery;
pub mod perf;
pub mod field;

pub use tag::{CompoundMap, ListTag, MapOrder, Tag, TagType, TagValue};
pub use codec::{get_codec, Compression};
pub use io_stream::{from_bytes, to_bytes, ByteOrder, NbtError, NbtOptions, NbtReader, NbtWriter};
pub use chunk::{ChunkBlob, ChunkError};
pub use region::{slot_index, ChangeSet, RegionError, RegionFile};
pub use field::{FieldError, FieldHolder, TagField};
