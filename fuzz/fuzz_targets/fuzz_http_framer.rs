//! Fuzz target for the incremental HTTP framer.
//!
//! Feeds arbitrary bytes in arbitrary read sizes to a response parser, a
//! request parser and the credential-rewriting interceptor. None of them may
//! panic, including when re-parsing what the request parser accepted.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use amtwsman::http::{write_message, Direction, MessageParser};
use amtwsman::interceptor::HttpInterceptor;

#[derive(Debug, Arbitrary)]
struct FramerInput {
    data: Vec<u8>,
    reads: Vec<u8>,
}

fn pieces<'a>(data: &'a [u8], reads: &[u8]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut rest = data;
    for size in reads {
        if rest.is_empty() {
            break;
        }
        let n = (*size as usize).clamp(1, rest.len());
        let (head, tail) = rest.split_at(n);
        out.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fuzz_target!(|input: FramerInput| {
    let pieces = pieces(&input.data, &input.reads);

    let mut response = MessageParser::new(Direction::Response);
    for piece in &pieces {
        if response.push(piece).is_err() {
            break;
        }
    }
    let _ = response.finish();

    let mut request = MessageParser::new(Direction::Request);
    for piece in &pieces {
        match request.push(piece) {
            Ok(messages) => {
                for message in messages {
                    let bytes = write_message(&message);
                    let mut again = MessageParser::new(Direction::Request);
                    let _ = again.push(&bytes);
                }
            }
            Err(_) => break,
        }
    }

    let mut interceptor = HttpInterceptor::new("admin", "P@ssw0rd");
    for piece in &pieces {
        if interceptor.process_device_data(piece).is_err() {
            break;
        }
    }
    for piece in &pieces {
        if interceptor.process_client_data(piece).is_err() {
            break;
        }
    }
});
