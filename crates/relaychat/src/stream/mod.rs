mod decoder;
mod encoder;
mod reframer;
mod types;

pub use decoder::{ResponseAccumulator, StreamDecoder, StreamOutcome, decode_stream};
pub use encoder::{EventEncoder, RelayStream};
pub use reframer::{LineReframer, RecordStream};
pub use types::{
    DATA_PREFIX, DONE_SENTINEL, DecodedFrame, ERROR_EVENT, EVENT_PREFIX, ErrorPayload, FrameMode,
    GenerationChunk, RelayEvent, UpstreamRecord,
};
