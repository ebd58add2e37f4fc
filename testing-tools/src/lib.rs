// Testing Tools Library
//
// Tooling for exercising a running relay end to end.
// Currently includes:
// - relay-test-client: publishes through the broker and checks what
//   WebSocket clients receive

pub mod observer;
pub mod output;
pub mod scenarios;
