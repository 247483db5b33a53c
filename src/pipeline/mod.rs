//! Generation pipeline: sentence segmentation, concurrent synthesis,
//! ordinal reordering and the per-session delivery station.

pub mod delivery;
pub mod generation;
pub mod reorder;
pub mod segmenter;
pub mod types;

pub use delivery::{DeliveryHandle, DeliveryStation};
pub use generation::{GenerationPipeline, TurnRequest};
pub use reorder::ReorderBuffer;
pub use segmenter::SentenceSegmenter;
pub use types::{
    Delivery, OutboundPacket, OutputMessage, PipelineEvent, StationControl, TurnOutcome,
    TurnStatus, WireFrame,
};
