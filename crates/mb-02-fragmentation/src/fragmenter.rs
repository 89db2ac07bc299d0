//! # Fragmenter
//!
//! Splits a message whose body exceeds the max fragment size into
//! `⌈N/C⌉` fragments. Every fragment carries a copy of the headers and a
//! `Microbus-Fragment: index/max` header.

use shared_types::frame::HEADER_FRAGMENT;
use shared_types::message::CONTENT_LENGTH;
use shared_types::header::HeaderValue;
use shared_types::{FrameMut, Headers, Request, Response};

/// A message that can be cut into fragments.
pub trait Fragmentable: Sized {
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn body(&self) -> &[u8];

    /// A copy of this message with a different body.
    fn with_body_slice(&self, body: &[u8]) -> Self;

    /// Replace the body, returning the previous one.
    fn replace_body(&mut self, body: Vec<u8>) -> Vec<u8>;
}

impl Fragmentable for Request {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn with_body_slice(&self, body: &[u8]) -> Self {
        Request {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: body.to_vec(),
            path_args: self.path_args.clone(),
        }
    }

    fn replace_body(&mut self, body: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.body, body)
    }
}

impl Fragmentable for Response {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn with_body_slice(&self, body: &[u8]) -> Self {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: body.to_vec(),
        }
    }

    fn replace_body(&mut self, body: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.body, body)
    }
}

/// Number of fragments a body of `len` bytes needs.
#[must_use]
pub fn fragment_count(len: usize, max_fragment_size: usize) -> u32 {
    if max_fragment_size == 0 || len <= max_fragment_size {
        return 1;
    }
    u32::try_from(len.div_ceil(max_fragment_size)).unwrap_or(u32::MAX)
}

/// Split a message into fragments of at most `max_fragment_size` body bytes.
///
/// A message that fits is returned as the single element, without a
/// fragment header.
pub fn fragment<M: Fragmentable>(mut msg: M, max_fragment_size: usize) -> Vec<M> {
    let count = fragment_count(msg.body().len(), max_fragment_size);
    if count <= 1 {
        msg.headers_mut().remove(HEADER_FRAGMENT);
        return vec![msg];
    }

    let body = msg.replace_body(Vec::new());
    body.chunks(max_fragment_size)
        .enumerate()
        .map(|(i, chunk)| {
            let mut part = msg.with_body_slice(chunk);
            let index = u32::try_from(i + 1).unwrap_or(u32::MAX);
            FrameMut::of(part.headers_mut()).set_fragment(index, count);
            part.headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(chunk.len()));
            part
        })
        .collect()
}
