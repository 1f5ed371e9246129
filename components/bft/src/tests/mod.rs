mod handlers;
mod network;
