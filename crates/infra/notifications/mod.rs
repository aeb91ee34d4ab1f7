pub mod messaging_http;
