//! Buffer Arena
//!
//! 一组固定编号的 buffer，每个 buffer 存放同构定长记录：
//! - 分配只在 Active buffer 上推进 `used`
//! - 记录删除只累加 `dead`，空间由 compaction 整体回收
//! - 被替换的 buffer / 底层存储挂在纪元 hold list 上，读纪元退休后才释放

pub mod arena;
pub mod buffer;
pub mod grow;

pub use arena::BufferArena;
pub use buffer::{BufferState, BufferStorage, BufferTable};
pub use grow::{grow_size, try_grow_size};
