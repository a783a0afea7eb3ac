// Outcome classification
//
// Build:
//   timed out                                   -> aborted ["build timed out after Ns"]
//   error marker in any stderr line             -> aborted, errorLines = stderr
//   exit 0 and (success marker or sentinel)     -> succeeded
//   otherwise                                   -> failed, errorLines = stdout
//
// Run:
//   timed out  -> aborted ["execution timed out after Ns"]
//   exit 0     -> succeeded, outputLines
//   otherwise  -> failed, outputLines + errorLines = stderr

use std::time::Duration;

use coderunner_core::{Outcome, Phase, RunNotification};

use super::config::BuildMarkers;
use super::runtime::{ContainerOutput, Termination};

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub fn classify_build(
    output: &ContainerOutput,
    sentinel_present: bool,
    markers: &BuildMarkers,
    timeout: Duration,
) -> RunNotification {
    if output.termination == Termination::TimedOut {
        return RunNotification::new(Phase::Build, Outcome::Aborted).with_error_lines(vec![
            format!("build timed out after {}s", timeout.as_secs()),
        ]);
    }

    if output
        .stderr
        .iter()
        .any(|line| contains_ignore_case(line, &markers.error))
    {
        return RunNotification::new(Phase::Build, Outcome::Aborted)
            .with_error_lines(output.stderr.clone());
    }

    let success_marker = output
        .stdout
        .iter()
        .any(|line| contains_ignore_case(line, &markers.success));

    if output.exit_code == Some(0) && (success_marker || sentinel_present) {
        RunNotification::new(Phase::Build, Outcome::Succeeded)
    } else {
        RunNotification::new(Phase::Build, Outcome::Failed).with_error_lines(output.stdout.clone())
    }
}

pub fn classify_run(output: &ContainerOutput, timeout: Duration) -> RunNotification {
    match output.termination {
        Termination::TimedOut => RunNotification::new(Phase::Run, Outcome::Aborted)
            .with_error_lines(vec![format!(
                "execution timed out after {}s",
                timeout.as_secs()
            )]),
        _ if output.exit_code == Some(0) => RunNotification::new(Phase::Run, Outcome::Succeeded)
            .with_output_lines(output.stdout.clone()),
        _ => RunNotification::new(Phase::Run, Outcome::Failed)
            .with_output_lines(output.stdout.clone())
            .with_error_lines(output.stderr.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn timed_out() -> ContainerOutput {
        ContainerOutput {
            exit_code: None,
            stdout: vec![],
            stderr: vec![],
            termination: Termination::TimedOut,
        }
    }

    const BUILD_TIMEOUT: Duration = Duration::from_secs(300);

    #[test]
    fn test_build_error_marker_aborts() {
        let output = ContainerOutput::exited(
            1,
            lines(&["Restoring..."]),
            lines(&["Program.cs(3,1): ERROR CS1002: ; expected"]),
        );

        let n = classify_build(&output, false, &BuildMarkers::default(), BUILD_TIMEOUT);

        assert_eq!(n.action, Phase::Build);
        assert_eq!(n.result, Outcome::Aborted);
        assert_eq!(
            n.error_lines,
            Some(lines(&["Program.cs(3,1): ERROR CS1002: ; expected"]))
        );
    }

    #[test]
    fn test_build_error_marker_wins_over_exit_zero() {
        let output = ContainerOutput::exited(0, lines(&["Build succeeded."]), lines(&["error"]));
        let n = classify_build(&output, true, &BuildMarkers::default(), BUILD_TIMEOUT);
        assert_eq!(n.result, Outcome::Aborted);
    }

    #[test]
    fn test_build_success_marker() {
        let output = ContainerOutput::exited(0, lines(&["", "Build succeeded."]), vec![]);
        let n = classify_build(&output, false, &BuildMarkers::default(), BUILD_TIMEOUT);
        assert_eq!(n.result, Outcome::Succeeded);
        assert!(n.error_lines.is_none());
    }

    #[test]
    fn test_build_sentinel_without_marker() {
        // dotnet publish does not print "Build succeeded"
        let output = ContainerOutput::exited(0, lines(&["Program -> /artifacts/"]), vec![]);
        let n = classify_build(&output, true, &BuildMarkers::default(), BUILD_TIMEOUT);
        assert_eq!(n.result, Outcome::Succeeded);
    }

    #[test]
    fn test_build_without_marker_or_sentinel_fails_with_stdout() {
        let output = ContainerOutput::exited(0, lines(&["weird output"]), vec![]);
        let n = classify_build(&output, false, &BuildMarkers::default(), BUILD_TIMEOUT);
        assert_eq!(n.result, Outcome::Failed);
        assert_eq!(n.error_lines, Some(lines(&["weird output"])));
    }

    #[test]
    fn test_build_non_zero_exit_fails() {
        let output = ContainerOutput::exited(137, lines(&["Build succeeded."]), vec![]);
        let n = classify_build(&output, true, &BuildMarkers::default(), BUILD_TIMEOUT);
        assert_eq!(n.result, Outcome::Failed);
    }

    #[test]
    fn test_build_timeout_aborts() {
        let n = classify_build(&timed_out(), false, &BuildMarkers::default(), BUILD_TIMEOUT);
        assert_eq!(n.result, Outcome::Aborted);
        assert_eq!(n.error_lines, Some(lines(&["build timed out after 300s"])));
    }

    #[test]
    fn test_run_success() {
        let output = ContainerOutput::exited(0, lines(&["Hello"]), vec![]);
        let n = classify_run(&output, Duration::from_secs(30));
        assert_eq!(n.action, Phase::Run);
        assert_eq!(n.result, Outcome::Succeeded);
        assert_eq!(n.output_lines, Some(lines(&["Hello"])));
        assert!(n.error_lines.is_none());
    }

    #[test]
    fn test_run_non_zero_exit() {
        let output = ContainerOutput::exited(
            1,
            lines(&["partial"]),
            lines(&["Unhandled exception."]),
        );
        let n = classify_run(&output, Duration::from_secs(30));
        assert_eq!(n.result, Outcome::Failed);
        assert_eq!(n.output_lines, Some(lines(&["partial"])));
        assert_eq!(n.error_lines, Some(lines(&["Unhandled exception."])));
    }

    #[test]
    fn test_run_timeout() {
        let n = classify_run(&timed_out(), Duration::from_secs(30));
        assert_eq!(n.result, Outcome::Aborted);
        assert_eq!(n.error_lines, Some(lines(&["execution timed out after 30s"])));
    }
}
