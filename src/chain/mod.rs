// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Process chains
//!
//! A chain is an ordered list of stages, each running one external program.
//! By default a stage's stdout feeds the next stage's stdin and its stderr is
//! dropped; either stream can also be forwarded, forked into extra sinks, or
//! both. Extra readers can be merged into any stage's stdin.
//!
//! ```no_run
//! # async fn demo() -> pipechain::ChainResult<()> {
//! let (stdout, _stderr, result) = pipechain::chain::builder()
//!     .join("ls", ["-l"])
//!     .join("grep", ["README"])
//!     .join("wc", ["-l"])
//!     .finalize()
//!     .run_and_capture()
//!     .await;
//! result?;
//! println!("{}", stdout);
//! # Ok(())
//! # }
//! ```

mod builder;
mod cancel;
mod command;
mod engine;
mod policy;
mod router;
mod stage;
mod streams;

pub use builder::{builder, ChainBuilder, FinalizedChain, Fresh, Linked, Phase, StageBuilder};
pub use cancel::CancelScope;
pub use command::{Environment, StageCommand};
pub use policy::{
    from_fn, ignore_all, ignore_exit_codes, ignore_exit_errors, ignore_nothing, ErrorPolicy,
};
pub use router::PIPE_CAPACITY;
pub use streams::{SharedBuffer, Sink, Source};

/// Argument list for stages joined without arguments
pub const NO_ARGS: [&str; 0] = [];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ChainError, BUILD_ERRORS, RUN_ERRORS, STREAM_ERRORS};
    use crate::hooks::FileMode;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn multiple(err: &ChainError) -> &crate::errors::MultiError {
        err.as_multiple().expect("expected an aggregate error")
    }

    #[tokio::test]
    async fn test_ls_grep_wc() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "readme").unwrap();

        let (stdout, _, result) = builder()
            .join("ls", ["-l"])
            .with_working_directory(dir.path())
            .join("grep", ["README"])
            .join("wc", ["-l"])
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "1\n");
    }

    #[tokio::test]
    async fn test_last_stage_streams_are_captured() {
        let (stdout, stderr, result) = builder()
            .join("sh", ["-c", "echo TEST; echo ERROR >&2"])
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "TEST\n");
        assert_eq!(stderr, "ERROR\n");
    }

    #[tokio::test]
    async fn test_stderr_of_inner_stage_is_dropped_by_default() {
        let (stdout, stderr, result) = builder()
            .join("sh", ["-c", "echo TEST; echo ERROR >&2"])
            .join("cat", NO_ARGS)
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "TEST\n");
        assert_eq!(stderr, "");
    }

    #[tokio::test]
    async fn test_fork_copies_are_identical() {
        let a = SharedBuffer::new();
        let b = SharedBuffer::new();

        let (stdout, _, result) = builder()
            .join("sh", ["-c", "for i in 1 2 3 4 5; do echo line $i; done"])
            .with_output_forks([a.clone()])
            .with_additional_output_forks([b.clone()])
            .join("cat", NO_ARGS)
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout.lines().count(), 5);
        assert_eq!(a.to_string_lossy(), stdout);
        assert_eq!(b.to_string_lossy(), stdout);
    }

    #[tokio::test]
    async fn test_forward_both_streams_combines() {
        let (stdout, _, result) = builder()
            .join("sh", ["-c", "echo out; echo err >&2"])
            .forward_error()
            .join("sort", NO_ARGS)
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "err\nout\n");
    }

    #[tokio::test]
    async fn test_forward_stderr_only() {
        let (stdout, _, result) = builder()
            .join("sh", ["-c", "echo out; echo err >&2"])
            .discard_stdout()
            .forward_error()
            .join("cat", NO_ARGS)
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "err\n");
    }

    #[tokio::test]
    async fn test_early_exit_consumer_terminates_chain() {
        let chain = builder()
            .join("yes", NO_ARGS)
            .with_error_policy(ignore_exit_errors())
            .join("head", ["-1"])
            .finalize();

        let (stdout, _, result) = tokio::time::timeout(Duration::from_secs(10), chain.run_and_capture())
            .await
            .expect("chain should terminate once head exits");

        result.unwrap();
        assert_eq!(stdout, "y\n");
    }

    #[tokio::test]
    async fn test_ignore_exit_code() {
        let (_, _, result) = builder()
            .join("sh", ["-c", "exit 13"])
            .with_error_policy(ignore_exit_codes([13]))
            .finalize()
            .run_and_capture()
            .await;
        result.unwrap();

        let err = builder()
            .join("sh", ["-c", "exit 13"])
            .with_error_policy(ignore_exit_codes([1]))
            .finalize()
            .run()
            .await
            .unwrap_err();

        let errors = multiple(&err);
        assert_eq!(errors.label(), RUN_ERRORS);
        assert_eq!(errors.get(0).and_then(ChainError::exit_code), Some(13));
    }

    #[tokio::test]
    async fn test_global_policy_applies_without_stage_policy() {
        let result = builder()
            .join("sh", ["-c", "exit 2"])
            .join("sh", ["-c", "cat; exit 3"])
            .with_error_policy(ignore_nothing())
            .finalize()
            .with_global_error_policy(ignore_all())
            .run()
            .await;

        let err = result.unwrap_err();
        let errors = multiple(&err);
        assert!(errors.get(0).is_none());
        assert_eq!(errors.get(1).and_then(ChainError::exit_code), Some(3));
    }

    #[tokio::test]
    async fn test_run_and_stream_errors_compose() {
        let (broken, reader) = tokio::io::duplex(16);
        drop(reader);

        let err = builder()
            .join("sh", ["-c", "echo x; exit 3"])
            .join("cat", NO_ARGS)
            .with_output_forks([broken])
            .join("cat", NO_ARGS)
            .finalize()
            .run()
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.starts_with("run and stream errors occurred"));
        assert!(text.contains(RUN_ERRORS));
        assert!(text.contains(STREAM_ERRORS));

        let composite = multiple(&err);
        let run = composite.get(0).and_then(ChainError::as_multiple).unwrap();
        let stream = composite.get(1).and_then(ChainError::as_multiple).unwrap();
        assert!(run.get(0).is_some());
        assert!(stream.get(1).is_some());
    }

    #[tokio::test]
    async fn test_injections_are_merged() {
        let (stdout, _, result) = builder()
            .join("grep", ["X"])
            .with_injections([b"X one\n".as_slice(), b"X two\n".as_slice()])
            .join("wc", ["-l"])
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "2\n");
    }

    #[tokio::test]
    async fn test_chain_input_feeds_first_stage() {
        let (stdout, _, result) = builder()
            .with_input([b"b\n".as_slice(), b"a\n".as_slice()])
            .join("sort", NO_ARGS)
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "a\nb\n");
    }

    #[tokio::test]
    async fn test_upstream_and_injection_combine() {
        let (stdout, _, result) = builder()
            .join("echo", ["from upstream"])
            .join("sort", NO_ARGS)
            .with_injections([b"injected\n".as_slice()])
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "from upstream\ninjected\n");
    }

    #[tokio::test]
    async fn test_stage_forwarding_nothing_is_a_build_error() {
        let err = builder()
            .join("echo", ["hi"])
            .discard_stdout()
            .join("cat", NO_ARGS)
            .finalize()
            .run()
            .await
            .unwrap_err();

        let errors = multiple(&err);
        assert_eq!(errors.label(), BUILD_ERRORS);
        assert!(matches!(
            errors.get(0),
            Some(ChainError::InvalidStreamConfiguration)
        ));
        assert!(errors.get(1).is_none());
    }

    #[tokio::test]
    async fn test_bad_environment_is_a_build_error() {
        let err = builder()
            .join("echo", ["hi"])
            .with_environment(["TEST", "VALUE", "TEST2"])
            .finalize()
            .run()
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "one or more chain build errors occurred: [0 - invalid count of environment arguments]"
        );
    }

    #[tokio::test]
    async fn test_start_failure_is_reported_singly() {
        let err = builder()
            .join("echo", ["hi"])
            .join("pipechain-test-no-such-program", NO_ARGS)
            .finalize()
            .run()
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to start command"));
        assert!(matches!(err, ChainError::StartFailed { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_start_failure_keeps_file_sinks_until_copies_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err.log");

        let err = builder()
            .join("sh", ["-c", "echo early >&2; sleep 0.3; echo late >&2"])
            .with_error_file(&path, FileMode::Truncate)
            .join("pipechain-test-no-such-program", NO_ARGS)
            .finalize()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::StartFailed { index: 1, .. }));

        let mut contents = String::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            contents = std::fs::read_to_string(&path).unwrap();
            if contents.contains("late") {
                break;
            }
        }
        assert_eq!(contents, "early\nlate\n");
    }

    #[tokio::test]
    async fn test_open_injection_is_closed_after_stage_exits() {
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"a\n").await.unwrap();

        let chain = builder()
            .join("head", ["-1"])
            .with_injections([reader])
            .finalize();

        let (stdout, _, result) = tokio::time::timeout(Duration::from_secs(10), chain.run_and_capture())
            .await
            .expect("chain should not wait for the injection to end");

        result.unwrap();
        assert_eq!(stdout, "a\n");
        drop(writer);
    }

    #[tokio::test]
    async fn test_large_binary_payload_through_fork_and_combine() {
        let payload: Vec<u8> = (0..2_000_000u32).map(|i| (i.wrapping_mul(31) % 251) as u8).collect();
        let fork = SharedBuffer::new();

        let (stdout, _, result) = builder()
            .with_input([std::io::Cursor::new(payload.clone())])
            .join("cat", NO_ARGS)
            .with_output_forks([fork.clone()])
            .join("wc", ["-c"])
            .with_injections([b"extra\n".as_slice()])
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(fork.contents(), payload);
        assert_eq!(stdout.trim(), (payload.len() + 6).to_string());
    }

    #[tokio::test]
    async fn test_cancel_scope_kills_stage() {
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            builder()
                .join("sh", ["-c", "exec sleep 30"])
                .with_cancel_scope(CancelScope::with_timeout(Duration::from_millis(100)))
                .finalize()
                .run(),
        )
        .await
        .expect("cancelled stage should not run to completion")
        .unwrap_err();

        assert!(matches!(
            multiple(&err).get(0),
            Some(ChainError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_environment_replaces_and_extends() {
        let (stdout, _, result) = builder()
            .join("/bin/sh", ["-c", "echo \"$TEST:$HOME\""])
            .with_environment(["TEST", "VALUE"])
            .finalize()
            .run_and_capture()
            .await;
        result.unwrap();
        assert_eq!(stdout, "VALUE:\n");

        let (stdout, _, result) = builder()
            .join("sh", ["-c", "echo \"$A $B\""])
            .with_additional_environment_pairs(["A=1"])
            .with_additional_environment_map([("B", "2")])
            .finalize()
            .run_and_capture()
            .await;
        result.unwrap();
        assert_eq!(stdout, "1 2\n");
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        let (stdout, _, result) = builder()
            .join("ls", NO_ARGS)
            .with_working_directory(dir.path())
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "marker\n");
    }

    #[tokio::test]
    async fn test_output_file_truncates_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        for word in ["first", "second"] {
            builder()
                .join("echo", [word])
                .with_output_file(&path, FileMode::Truncate)
                .finalize()
                .run()
                .await
                .unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[tokio::test]
    async fn test_output_file_appends_and_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        for _ in 0..2 {
            let (stdout, _, result) = builder()
                .join("echo", ["hi"])
                .with_output_file(&path, FileMode::Append)
                .join("cat", NO_ARGS)
                .finalize()
                .run_and_capture()
                .await;
            result.unwrap();
            assert_eq!(stdout, "hi\n");
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi\nhi\n");
    }

    #[tokio::test]
    async fn test_failed_pre_run_hook_prevents_start() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started");

        let err = builder()
            .join("touch", [marker.to_string_lossy().into_owned()])
            .with_error_file(dir.path().join("missing").join("err.txt"), FileMode::Truncate)
            .finalize()
            .run()
            .await
            .unwrap_err();

        assert_eq!(multiple(&err).label(), BUILD_ERRORS);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_apply_customizes_process() {
        let (stdout, _, result) = builder()
            .join("sh", ["-c", "echo $APPLIED"])
            .apply(|index, cmd| {
                cmd.env("APPLIED", format!("stage {}", index));
            })
            .finalize()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "stage 0\n");
    }

    #[tokio::test]
    async fn test_empty_chain_succeeds() {
        builder().finalize().run().await.unwrap();
    }

    #[test]
    fn test_display() {
        let chain = builder()
            .join("ls", ["-l"])
            .join("grep", ["README"])
            .forward_error()
            .join("wc", ["-l"])
            .finalize();

        assert_eq!(chain.to_string(), "ls -l | grep README |& wc -l");
        assert_eq!(chain.stage_count(), 3);
    }
}
