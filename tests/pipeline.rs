use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use predicates::prelude::*;

const ENTRY_PATH: &str = "/cancer/view.do?cancer_seq=4757";

const MENU: &str = r#"<div id="cancerMenu">
  <ul>
    <li class="category"><a href="view.do?cancer_seq=4757">요약설명</a></li>
  </ul>
  <ul>
    <li class="category"><span>암이란</span></li>
    <li><a href="view.do?cancer_seq=4757&amp;menu_seq=4762">발생부위</a></li>
    <li><a href="view.do?cancer_seq=4757&amp;menu_seq=4763">정의 및 종류</a></li>
  </ul>
  <ul>
    <li class="category"><span>진단</span></li>
    <li><a href="view.do?cancer_seq=4757&amp;menu_seq=4770">일반적증상</a></li>
  </ul>
</div>"#;

fn page(body: &str) -> String {
    format!(
        r##"<!doctype html>
<html>
<head><title>국가암정보센터</title><script>var tracking = 1;</script></head>
<body>
<div id="header">사이트 머리글</div>
<div id="contents">
  <div id="div_page">
    {MENU}
    <div class="inner-tab"><a href="#">탭 메뉴</a></div>
    {body}
    <img src="figure.png" alt="그림">
  </div>
</div>
</body>
</html>
"##
    )
}

struct CancerSite {
    base_url: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CancerSite {
    /// Serves one breast-cancer entry page and its detail pages. Paths in
    /// `failing` always answer 500.
    fn spawn(failing: &[&str]) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let failing = failing.iter().map(|p| (*p).to_owned()).collect::<Vec<_>>();
        let hits = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let pages = HashMap::from([
            (
                ENTRY_PATH.to_owned(),
                page("<h3>유방암 요약</h3><p>유방암은 유방에 생기는 암입니다.</p>"),
            ),
            (
                "/cancer/view.do?cancer_seq=4757&menu_seq=4762".to_owned(),
                page("<p>유방은 가슴에 있는 기관으로 유선과 지방으로 이루어져 있습니다.</p>"),
            ),
            (
                "/cancer/view.do?cancer_seq=4757&menu_seq=4763".to_owned(),
                page("<p>유방암은 유방 밖으로 퍼지지 않은 상피내암과 침윤성 유방암으로 나뉩니다.</p>"),
            ),
            (
                "/cancer/view.do?cancer_seq=4757&menu_seq=4770".to_owned(),
                page("<ul><li>유방의 통증 없는 멍울</li><li>유두 분비물</li></ul>"),
            ),
        ]);

        let handle = {
            let hits = Arc::clone(&hits);
            thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    let request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let url = request.url().to_owned();
                    *hits.lock().unwrap().entry(url.clone()).or_default() += 1;

                    let response = if failing.contains(&url) {
                        tiny_http::Response::from_string("upstream busy").with_status_code(500)
                    } else if let Some(html) = pages.get(&url) {
                        let header = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/html; charset=utf-8"[..],
                        )
                        .expect("build header");
                        tiny_http::Response::from_string(html.clone())
                            .with_status_code(200)
                            .with_header(header)
                    } else {
                        tiny_http::Response::from_string("not found").with_status_code(404)
                    };
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            base_url,
            hits,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn write_targets(&self, path: &Path) {
        let yaml = format!(
            "- id: breast\n  name: 유방암\n  name_en: Breast Cancer\n  url: {}{ENTRY_PATH}\n  category: 암\n",
            self.base_url
        );
        fs::write(path, yaml).expect("write targets file");
    }
}

impl Drop for CancerSite {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn crawl_cmd(targets: &Path, data_dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("medical-rag");
    cmd.arg("crawl")
        .args(["--engine", "http", "--settle-ms", "0", "--retry-delay-ms", "0"])
        .arg("--targets")
        .arg(targets)
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

#[test]
fn crawl_convert_index_ask_end_to_end() {
    let site = CancerSite::spawn(&[]);
    let tmp = tempfile::tempdir().expect("tempdir");
    let targets = tmp.path().join("targets.yaml");
    let data_dir = tmp.path().join("data");
    site.write_targets(&targets);

    crawl_cmd(&targets, &data_dir).assert().success();

    let raw = data_dir.join("raw").join("html").join("breast");
    assert!(raw.join("summary.html").is_file());
    assert!(raw.join("overview").join("location.html").is_file());
    assert!(raw.join("overview").join("definition.html").is_file());
    assert!(raw.join("diagnosis").join("symptoms.html").is_file());
    let menu: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(raw.join("menu-structure.json")).unwrap())
            .unwrap();
    assert_eq!(menu["cancerSeq"], "4757");
    assert_eq!(menu["categories"][1]["nameEn"], "diagnosis");

    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .arg("convert")
        .arg("--targets")
        .arg(&targets)
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    let doc = fs::read_to_string(data_dir.join("processed").join("cancers").join("breast.md"))
        .expect("read processed document");
    assert!(doc.starts_with("---\n"));
    assert!(doc.contains("disease_id: breast"));
    assert!(doc.contains("category: cancer"));
    assert!(doc.contains(&format!("source_url: {}{ENTRY_PATH}", site.base_url)));

    let order = [
        "# 요약설명",
        "# 암이란",
        "## 발생부위",
        "## 정의 및 종류",
        "# 진단",
        "## 일반적증상",
    ]
    .map(|heading| {
        doc.find(&format!("\n{heading}\n"))
            .unwrap_or_else(|| panic!("missing heading {heading:?} in:\n{doc}"))
    });
    assert!(order.windows(2).all(|w| w[0] < w[1]), "{order:?}");
    assert!(doc.contains("유방은 가슴에 있는 기관"));
    assert!(doc.contains("- 유두 분비물"));
    assert!(!doc.contains("탭 메뉴"));
    assert!(!doc.contains("figure.png"));
    assert!(!doc.contains("tracking"));

    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .args(["index", "--embedding-engine", "hashing"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stderr(predicate::str::contains("indexing completed"));
    assert!(data_dir.join("index").join("vectors.json").is_file());

    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .args(["ask", "--embedding-engine", "hashing", "--chat-engine", "noop"])
        .args(["--query", "유방암 증상"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("# 사용자 질문\n유방암 증상"))
        .stderr(predicate::str::contains("[1] 유방암"));

    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .args(["ask", "--agent", "--embedding-engine", "hashing", "--chat-engine", "noop"])
        .args(["--query", "유방암 증상"])
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Source: 유방암\nContent: "));
}

#[test]
fn exhausted_retries_fail_the_run_but_keep_the_menu() {
    let failing = "/cancer/view.do?cancer_seq=4757&menu_seq=4763";
    let site = CancerSite::spawn(&[failing]);
    let tmp = tempfile::tempdir().expect("tempdir");
    let targets = tmp.path().join("targets.yaml");
    let data_dir = tmp.path().join("data");
    site.write_targets(&targets);

    crawl_cmd(&targets, &data_dir)
        .args(["--max-attempts", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("crawl target breast (유방암)"))
        .stderr(predicate::str::contains("500"));

    assert_eq!(site.hits(failing), 2);
    assert_eq!(
        site.hits("/cancer/view.do?cancer_seq=4757&menu_seq=4770"),
        0,
        "pages after the failure are not fetched"
    );
    let raw = data_dir.join("raw").join("html").join("breast");
    assert!(raw.join("menu-structure.json").is_file());
    assert!(raw.join("overview").join("location.html").is_file());
    assert!(!raw.join("overview").join("definition.html").exists());
}

#[test]
fn skip_existing_does_not_refetch_stored_pages() {
    let site = CancerSite::spawn(&[]);
    let tmp = tempfile::tempdir().expect("tempdir");
    let targets = tmp.path().join("targets.yaml");
    let data_dir = tmp.path().join("data");
    site.write_targets(&targets);

    crawl_cmd(&targets, &data_dir).assert().success();
    crawl_cmd(&targets, &data_dir)
        .arg("--skip-existing")
        .assert()
        .success();

    assert_eq!(site.hits(ENTRY_PATH), 2);
    assert_eq!(site.hits("/cancer/view.do?cancer_seq=4757&menu_seq=4762"), 1);
}

#[test]
fn convert_without_crawl_reports_missing_menu() {
    let site = CancerSite::spawn(&[]);
    let tmp = tempfile::tempdir().expect("tempdir");
    let targets = tmp.path().join("targets.yaml");
    site.write_targets(&targets);

    assert_cmd::cargo::cargo_bin_cmd!("medical-rag")
        .arg("convert")
        .arg("--targets")
        .arg(&targets)
        .arg("--data-dir")
        .arg(tmp.path().join("data"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("convert target breast (유방암)"))
        .stderr(predicate::str::contains("read menu structure"));
}
