//! Integration tests: the heartbeat and executor against an in-memory
//! gateway, and the HTTP gateway against a local stub server.

mod heartbeat;
mod http_gateway;
mod mock_gateway;
