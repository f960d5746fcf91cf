mod openai_stub;

use std::fs;
use std::path::Path;

use predicates::prelude::*;

use openai_stub::{AGENT_ANSWER, API_KEY, OpenAiStub};

const BREAST: &str = "---
disease_id: breast
disease_name: 유방암
disease_name_en: Breast Cancer
category: cancer
source: 국가암정보센터
source_url: https://www.cancer.go.kr/lay1/program/S1T211C217/cancer/view.do?cancer_seq=4757
collected_date: 2026-10-16
verified: false
---

# 요약설명

유방암은 유방에 생기는 암입니다.

# 진단

## 일반적증상

유방의 통증 없는 멍울이 가장 흔한 증상입니다.
";

fn write_processed(data_dir: &Path) {
    let dir = data_dir.join("processed").join("cancers");
    fs::create_dir_all(&dir).expect("create processed dir");
    fs::write(dir.join("breast.md"), BREAST).expect("write processed document");
}

fn medical_rag(stub: &OpenAiStub, subcommand: &str, data_dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("medical-rag");
    cmd.arg(subcommand)
        .env("OPENAI_BASE_URL", &stub.base_url)
        .env("OPENAI_API_KEY", API_KEY)
        .env_remove("MEDICAL_RAG_CHAT_MODEL")
        .env_remove("MEDICAL_RAG_EMBEDDING_MODEL")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

#[test]
fn index_and_ask_through_openai_compatible_api() {
    let stub = OpenAiStub::spawn();
    let tmp = tempfile::tempdir().expect("tempdir");
    let data_dir = tmp.path().join("data");
    write_processed(&data_dir);

    medical_rag(&stub, "index", &data_dir)
        .args(["--batch-size", "1"])
        .assert()
        .success();

    let embedding_requests = stub.bodies("/v1/embeddings");
    assert_eq!(embedding_requests.len(), 2, "one request per chunk with batch size 1");
    assert_eq!(embedding_requests[0]["model"], "text-embedding-3-small");

    medical_rag(&stub, "ask", &data_dir)
        .args(["--query", "유방암 증상"])
        .assert()
        .success()
        .stdout(predicate::str::contains("유방암은 유방에 생기는 암입니다."))
        .stderr(predicate::str::contains("[1] 유방암"));

    let completions = stub.bodies("/v1/chat/completions");
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0]["stream"], true);
    assert_eq!(completions[0]["model"], "gpt-4o-mini");
    let prompt = completions[0]["messages"][0]["content"]
        .as_str()
        .expect("prompt text");
    assert!(prompt.contains("[문서 1]\n출처: 유방암\n내용: "));
    assert!(prompt.contains("# 사용자 질문\n유방암 증상"));

    medical_rag(&stub, "ask", &data_dir)
        .args(["--agent", "--query", "유방암 증상"])
        .assert()
        .success()
        .stdout(predicate::str::contains(AGENT_ANSWER));

    let completions = stub.bodies("/v1/chat/completions");
    assert_eq!(completions.len(), 3, "tool call turn plus answer turn");
    assert_eq!(
        completions[1]["tools"][0]["function"]["name"],
        "retrieve_medical_info"
    );
    let messages = completions[2]["messages"].as_array().expect("messages");
    let tool_result = messages
        .iter()
        .find(|m| m["role"] == "tool")
        .expect("tool result message");
    assert_eq!(tool_result["tool_call_id"], "call_stub_1");
    assert!(
        tool_result["content"]
            .as_str()
            .unwrap_or_default()
            .starts_with("Source: 유방암\nContent: ")
    );
}

#[test]
fn openai_engine_without_key_fails_fast() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_processed(tmp.path());

    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .env_remove("OPENAI_API_KEY")
        .arg("index")
        .arg("--data-dir")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_API_KEY is not set"));
}

#[test]
fn invalid_key_surfaces_api_error() {
    let stub = OpenAiStub::spawn();
    let tmp = tempfile::tempdir().expect("tempdir");
    write_processed(tmp.path());

    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .env("OPENAI_BASE_URL", &stub.base_url)
        .env("OPENAI_API_KEY", "sk-wrong")
        .arg("index")
        .arg("--data-dir")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid api key"));
}
