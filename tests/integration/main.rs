mod conversation_flow;
mod derived_content;
mod helpers;
