// Signal providers: trait-based abstraction over heterogeneous classifiers.
//
// The SignalProvider trait defines the interface. The general classifier
// (local toxic-bert ONNX or the Perspective API) always runs; the OpenAI
// categorizer is consulted on escalation; the keyword dictionary backs the
// standalone fallback path.

pub mod download;
pub mod general;
pub mod keywords;
pub mod onnx;
pub mod openai;
pub mod perspective;
pub mod rate_limiter;
pub mod traits;
