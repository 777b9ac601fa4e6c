mod common;

use clangscope::parse::EntityKind;
use clangscope::runtime::ProjectRuntime;
use common::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread")]
async fn watcher_drives_reparse_and_save() {
    let fx = fixture();
    let a_cpp = fx.file("a.cpp");
    fx.parser.script(
        &a_cpp,
        UnitScript {
            decls: vec![decl(
                "c:a@before_edit",
                "before_edit",
                EntityKind::Function,
                true,
                pos(&a_cpp, 1, 6, 5),
            )],
            ..Default::default()
        },
    );
    fx.index(&a_cpp);
    fx.wait();
    assert!(fx.project.list_symbols("", &[]).contains("before_edit"));

    let cancel = CancellationToken::new();
    let runtime = ProjectRuntime::new(fx.project.clone(), cancel.clone()).unwrap();
    let handle = tokio::spawn(runtime.run());

    // give the loop time to drain the queued watch-dir registrations
    tokio::time::sleep(Duration::from_millis(300)).await;

    fx.parser.script(
        &a_cpp,
        UnitScript {
            decls: vec![decl(
                "c:a@after_edit",
                "after_edit",
                EntityKind::Function,
                true,
                pos(&a_cpp, 1, 6, 5),
            )],
            ..Default::default()
        },
    );
    std::fs::write(&a_cpp, "// edited\n").unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let symbols = fx.project.list_symbols("", &[]);
        if symbols.contains("after_edit") && !symbols.contains("before_edit") {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "watcher never drove the reparse; symbols: {symbols:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // dirty batches sync immediately and save two seconds later
    let data_dir = fx.dir.path().join("data");
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let saved = std::fs::read_dir(&data_dir)
            .map(|entries| entries.count() > 0)
            .unwrap_or(false);
        if saved {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "save timer never fired"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    cancel.cancel();
    handle.await.unwrap();
}
