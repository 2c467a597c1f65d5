mod args;
mod byref;
mod common;
mod container;
mod context;
mod eval;
mod http;
mod object;
mod stream;
mod wait;
