use bibaffils::config::RetryPolicy;
use bibaffils::pipeline::{Pipeline, RunSummary};
use bibaffils::{AffilError, Config};
use mockito::{Matcher, Server, ServerGuard};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ONE_WITH_DOI: &str = r#"
@article{smith2020,
  title = {Quantum Widgets},
  author = {J. Smith},
  doi = {10.1/abc}
}
"#;

const ONE_WITHOUT_DOI: &str = r#"
@article{curie1903,
  title = {Radioactive Substances},
  author = {Curie, Marie and Curie, Pierre}
}
"#;

const THREE_RECORDS: &str = r#"
@article{first,
  title = {First Paper},
  author = {Smith, John and Doe, Jane},
  doi = {10.1/one}
}

@article{second,
  title = {Second Paper, With Comma},
  author = {Lopez, Ana}
}

@article{third,
  title = {Third Paper},
  author = {Chen, Bo},
  note = {Published as https://doi.org/10.5555/three.}
}
"#;

fn test_config(server: &ServerGuard, dir: &TempDir, bib: &str) -> Config {
    let input = dir.path().join("works.bib");
    std::fs::write(&input, bib).unwrap();

    let mut config = Config::new("tests@example.org");
    config.input = input;
    config.output = dir.path().join("out.csv");
    config.crossref_base = server.url();
    config.openalex_base = server.url();
    config.pause = Duration::ZERO;
    config.timeout = Duration::from_secs(5);
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    config
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn crossref_work(authors: &str) -> String {
    format!(r#"{{"status": "ok", "message": {{"author": [{}]}}}}"#, authors)
}

fn openalex_work(authorships: &str) -> String {
    format!(r#"{{"id": "https://openalex.org/W1", "authorships": [{}]}}"#, authorships)
}

async fn openalex_title_search(server: &mut ServerGuard, body: &str) -> mockito::Mock {
    server
        .mock("GET", "/works")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("filter".into(), "title.search:Radioactive Substances".into()),
            Matcher::UrlEncoded("per_page".into(), "1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(1)
        .create_async()
        .await
}

async fn mock_json(server: &mut ServerGuard, path: &str, body: String) -> mockito::Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::UrlEncoded("mailto".into(), "tests@example.org".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_services_merge_into_single_row() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, ONE_WITH_DOI);

    let crossref = mock_json(
        &mut server,
        "/works/10.1/abc",
        crossref_work(r#"{"given": "J.", "family": "Smith", "affiliation": [{"name": "MIT"}]}"#),
    )
    .await;
    let openalex = mock_json(
        &mut server,
        "/works/doi:10.1/abc",
        openalex_work(r#"{"author": {"display_name": "j. smith"}, "institutions": []}"#),
    )
    .await;
    let search = server
        .mock("GET", "/works")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\nJ. Smith,MIT,10.1/abc,Quantum Widgets\n"
    );
    assert_eq!(summary.doi_known, 1);
    assert_eq!(summary.rows, 1);

    crossref.assert_async().await;
    openalex.assert_async().await;
    search.assert_async().await;
}

#[tokio::test]
async fn test_unmatched_lookup_reports_raw_authors() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, ONE_WITHOUT_DOI);

    let search = server
        .mock("GET", "/works")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("query.author".into(), "Curie".into()),
            Matcher::UrlEncoded("rows".into(), "1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message": {"items": []}}"#)
        .expect(1)
        .create_async()
        .await;
    let title_search = openalex_title_search(&mut server, r#"{"results": []}"#).await;

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\n\
         \"Curie, Marie\",,,Radioactive Substances\n\
         \"Curie, Pierre\",,,Radioactive Substances\n"
    );
    assert_eq!(summary.doi_unresolved, 1);
    assert_eq!(summary.crossref_failures, 0);
    search.assert_async().await;
    title_search.assert_async().await;
}

#[tokio::test]
async fn test_openalex_title_search_resolves_doi() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, ONE_WITHOUT_DOI);

    let _search = server
        .mock("GET", "/works")
        .match_query(Matcher::UrlEncoded("query.author".into(), "Curie".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message": {"items": []}}"#)
        .create_async()
        .await;
    let title_search = openalex_title_search(
        &mut server,
        r#"{"results": [{"id": "https://openalex.org/W7", "doi": "https://doi.org/10.7/OA", "title": "Radioactive substances"}]}"#,
    )
    .await;
    let _crossref = mock_json(
        &mut server,
        "/works/10.7/oa",
        crossref_work(r#"{"given": "Marie", "family": "Curie", "affiliation": [{"name": "Sorbonne"}]}"#),
    )
    .await;
    let _openalex = mock_json(
        &mut server,
        "/works/doi:10.7/oa",
        openalex_work(
            r#"{"author": {"display_name": "Pierre Curie"}, "institutions": [{"display_name": "ESPCI"}]}"#,
        ),
    )
    .await;

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\n\
         Marie Curie,Sorbonne,10.7/oa,Radioactive Substances\n\
         Pierre Curie,ESPCI,10.7/oa,Radioactive Substances\n"
    );
    assert_eq!(summary.doi_resolved, 1);
    assert_eq!(summary.doi_unresolved, 0);
    title_search.assert_async().await;
}

#[tokio::test]
async fn test_openalex_author_lookup_fills_affiliation() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, ONE_WITH_DOI);

    let _crossref = mock_json(
        &mut server,
        "/works/10.1/abc",
        crossref_work(r#"{"given": "J.", "family": "Smith", "affiliation": []}"#),
    )
    .await;
    let _openalex = mock_json(
        &mut server,
        "/works/doi:10.1/abc",
        openalex_work(
            r#"{"author": {"id": "https://openalex.org/A42", "display_name": "J. Smith"}, "institutions": [], "raw_affiliation_strings": []}"#,
        ),
    )
    .await;
    let author = server
        .mock("GET", "/authors/A42")
        .match_query(Matcher::UrlEncoded("mailto".into(), "tests@example.org".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id": "https://openalex.org/A42", "last_known_institutions": [{"display_name": "CERN"}]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let output = config.output.clone();
    Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\nJ. Smith,CERN,10.1/abc,Quantum Widgets\n"
    );
    author.assert_async().await;
}

#[tokio::test]
async fn test_resolved_doi_is_fetched() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, ONE_WITHOUT_DOI);

    let _search = server
        .mock("GET", "/works")
        .match_query(Matcher::UrlEncoded("query.author".into(), "Curie".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"message": {"items": [{"DOI": "10.9999/RAD", "title": ["Radioactive substances"], "score": 90.1}]}}"#,
        )
        .create_async()
        .await;
    let _crossref = mock_json(
        &mut server,
        "/works/10.9999/rad",
        crossref_work(
            r#"{"given": "Marie", "family": "Curie", "affiliation": [{"name": "Sorbonne"}]},
               {"given": "Pierre", "family": "Curie", "affiliation": []}"#,
        ),
    )
    .await;
    let _openalex = mock_json(
        &mut server,
        "/works/doi:10.9999/rad",
        openalex_work(
            r#"{"author": {"display_name": "Pierre Curie"}, "institutions": [{"display_name": "ESPCI"}]}"#,
        ),
    )
    .await;

    let mut pipeline_config = config;
    pipeline_config.match_threshold = 0.95;
    let output = pipeline_config.output.clone();
    let summary = Pipeline::new(pipeline_config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\n\
         Marie Curie,Sorbonne,10.9999/rad,Radioactive Substances\n\
         Pierre Curie,ESPCI,10.9999/rad,Radioactive Substances\n"
    );
    assert_eq!(summary.doi_resolved, 1);
}

#[tokio::test]
async fn test_failing_service_leaves_other_source() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, ONE_WITH_DOI);

    let crossref = server
        .mock("GET", "/works/10.1/abc")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(3)
        .create_async()
        .await;
    let _openalex = mock_json(
        &mut server,
        "/works/doi:10.1/abc",
        openalex_work(
            r#"{"author": {"display_name": "John Smith"}, "institutions": [{"display_name": "Caltech"}]}"#,
        ),
    )
    .await;

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\nJohn Smith,Caltech,10.1/abc,Quantum Widgets\n"
    );
    assert_eq!(summary.crossref_failures, 1);
    assert_eq!(summary.openalex_failures, 0);
    crossref.assert_async().await;
}

#[tokio::test]
async fn test_timed_out_service_leaves_other_source() {
    // Crossref stand-in that accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_url = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    let silent = tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            open.push(socket);
        }
    });

    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir, ONE_WITH_DOI);
    config.crossref_base = silent_url;
    config.timeout = Duration::from_millis(100);

    let _openalex = mock_json(
        &mut server,
        "/works/doi:10.1/abc",
        openalex_work(
            r#"{"author": {"display_name": "John Smith"}, "institutions": [{"display_name": "Caltech"}]}"#,
        ),
    )
    .await;

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\nJohn Smith,Caltech,10.1/abc,Quantum Widgets\n"
    );
    assert_eq!(summary.crossref_failures, 1);
    assert_eq!(summary.openalex_failures, 0);
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
    silent.abort();
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, ONE_WITH_DOI);

    // mockito hands a request to the first matching mock still short of its
    // expected hits, so the 429 is served once before the success
    let limited = server
        .mock("GET", "/works/10.1/abc")
        .match_query(Matcher::Any)
        .with_status(429)
        .expect(1)
        .create_async()
        .await;
    let _crossref = mock_json(
        &mut server,
        "/works/10.1/abc",
        crossref_work(r#"{"given": "J.", "family": "Smith", "affiliation": [{"name": "MIT"}]}"#),
    )
    .await;
    let _openalex = mock_json(&mut server, "/works/doi:10.1/abc", openalex_work("")).await;

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.crossref_failures, 0);
    assert!(read(&output).contains("J. Smith,MIT,10.1/abc"));
    limited.assert_async().await;
}

#[tokio::test]
async fn test_empty_bibliography_writes_header_only() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, "");

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(read(&output), "author,affiliation,doi,title\n");
    assert_eq!(summary, RunSummary::default());
}

#[tokio::test]
async fn test_output_is_deterministic() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir, THREE_RECORDS);

    let _crossref = mock_json(
        &mut server,
        "/works/10.1/one",
        crossref_work(
            r#"{"given": "John", "family": "Smith", "affiliation": [{"name": "MIT"}, {"name": "Broad Institute"}]},
               {"given": "Jane", "family": "Doe", "affiliation": []}"#,
        ),
    )
    .await;
    let _openalex = mock_json(
        &mut server,
        "/works/doi:10.1/one",
        openalex_work(
            r#"{"author": {"display_name": "Jane Doe"}, "institutions": [{"display_name": "Stanford University"}]},
               {"author": {"display_name": "John Smith"}, "institutions": [{"display_name": "Harvard, Medical School"}]}"#,
        ),
    )
    .await;
    let _search = server
        .mock("GET", "/works")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message": {"items": [{"DOI": "10.7/unrelated", "title": ["Completely unrelated"]}]}}"#)
        .create_async()
        .await;
    let _crossref = mock_json(
        &mut server,
        "/works/10.5555/three",
        crossref_work(r#"{"given": "Bo", "family": "Chen", "affiliation": []}"#),
    )
    .await;
    let _openalex = mock_json(
        &mut server,
        "/works/doi:10.5555/three",
        openalex_work(r#"{"author": {"display_name": "Bo Chen"}, "institutions": []}"#),
    )
    .await;

    let output = config.output.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let first_summary = pipeline.run().await.unwrap();
    let first = read(&output);
    pipeline.run().await.unwrap();
    let second = read(&output);

    assert_eq!(first, second);
    assert_eq!(
        first,
        "author,affiliation,doi,title\n\
         John Smith,MIT,10.1/one,First Paper\n\
         John Smith,Broad Institute,10.1/one,First Paper\n\
         John Smith,\"Harvard, Medical School\",10.1/one,First Paper\n\
         Jane Doe,Stanford University,10.1/one,First Paper\n\
         \"Lopez, Ana\",,,\"Second Paper, With Comma\"\n\
         Bo Chen,,10.5555/three,Third Paper\n"
    );
    assert_eq!(first_summary.records, 3);
    assert_eq!(first_summary.doi_known, 2);
    assert_eq!(first_summary.doi_unresolved, 1);
}

#[tokio::test]
async fn test_missing_input_is_fatal() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir, "");
    config.input = dir.path().join("nope.bib");

    let err = Pipeline::new(config).unwrap().run().await.unwrap_err();
    assert!(matches!(err, AffilError::Parse(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_unwritable_output_is_fatal() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir, "");
    config.output = dir.path().join("no-such-dir").join("out.csv");

    let err = Pipeline::new(config).unwrap().run().await.unwrap_err();
    assert!(matches!(err, AffilError::Write(_)));
}

#[tokio::test]
async fn test_author_search_fills_blank_affiliations() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir, ONE_WITHOUT_DOI);
    config.author_search = true;

    let _search = server
        .mock("GET", "/works")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message": {"items": []}}"#)
        .create_async()
        .await;
    let authors = server
        .mock("GET", "/authors")
        .match_query(Matcher::UrlEncoded("per_page".into(), "1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"results": [{"display_name": "Curie", "last_known_institutions": [{"display_name": "University of Paris"}]}]}"#,
        )
        .expect(2)
        .create_async()
        .await;

    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().run().await.unwrap();

    assert_eq!(
        read(&output),
        "author,affiliation,doi,title\n\
         \"Curie, Marie\",University of Paris,,Radioactive Substances\n\
         \"Curie, Pierre\",University of Paris,,Radioactive Substances\n"
    );
    assert_eq!(summary.fallback_filled, 2);
    authors.assert_async().await;
}
