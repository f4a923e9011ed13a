#[test]
fn server_main_delegates_to_library_entrypoint() {
    let source = include_str!("../src/main.rs");

    assert!(
        source.contains("run_server("),
        "main should delegate to run_server"
    );
    assert!(
        source.contains("SHELLBOX_API_KEY"),
        "api key must fall back to the environment"
    );
}
