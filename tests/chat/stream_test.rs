//! Integration tests for the event-stream decoder.

use futures_util::TryStreamExt;
use seq_llm::chat::{collect_text, decode_line, decode_tokens, token_stream, SseLine};

use super::delta_frame;

#[tokio::test]
async fn decodes_a_realistic_llama_server_stream() {
    let mut body = String::new();
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n");
    for word in ["The", " answer", " is", " 42."] {
        body.push_str(&delta_frame(word));
    }
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"completion_tokens\":4}}\n\n");
    body.push_str("data: [DONE]\n\n");

    let text = collect_text(token_stream(std::io::Cursor::new(body.into_bytes())))
        .await
        .unwrap();

    assert_eq!(text, "The answer is 42.");
}

#[tokio::test]
async fn every_split_point_yields_the_same_tokens() {
    let body = format!("{}{}data: [DONE]\n", delta_frame("Hel"), delta_frame("lo"));
    let bytes = body.as_bytes();

    for split in 1..bytes.len() {
        let reader = tokio_test::io::Builder::new()
            .read(&bytes[..split])
            .read(&bytes[split..])
            .build();
        let tokens: Vec<String> = decode_tokens(tokio::io::BufReader::new(reader))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(tokens, vec!["Hel", "lo"], "split at byte {split}");
    }
}

#[tokio::test]
async fn multibyte_text_split_mid_character() {
    let body = format!("{}data: [DONE]\n", delta_frame("héllo wörld"));
    let bytes = body.as_bytes();
    let split = body.find('é').unwrap() + 1;

    let reader = tokio_test::io::Builder::new()
        .read(&bytes[..split])
        .read(&bytes[split..])
        .build();
    let tokens: Vec<String> = decode_tokens(tokio::io::BufReader::new(reader))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(tokens, vec!["héllo wörld"]);
}

#[test]
fn fallback_fields_in_priority_order() {
    assert_eq!(
        decode_line(r#"data: {"choices":[{"text":"legacy"}]}"#),
        SseLine::Token("legacy".to_string())
    );
    assert_eq!(
        decode_line(r#"data: {"choices":[{"message":{"role":"assistant","content":"whole"}}]}"#),
        SseLine::Token("whole".to_string())
    );
    assert_eq!(decode_line(r#"data: {"choices":[{"delta":{}}]}"#), SseLine::Skip);
}
