pub mod mock_n8n;
pub mod n8n;
