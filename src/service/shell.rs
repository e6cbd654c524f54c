//! SHELL_COMMAND handling (spec §4.5): hand the command to the executor
//! and report its outcome, or ERROR if the executor raised.
use crate::executor::CommandExecutor;
use crate::message::{Message, ShellResult};
use crate::sender::OutgoingQueue;
use crate::errors::Result;

pub fn handle_command(
    executor: &mut dyn CommandExecutor,
    queue: &OutgoingQueue,
    command: &str,
    working_directory: &str,
) -> Result<()> {
    if !working_directory.is_empty() && working_directory != executor.cwd() {
        if let Err(e) = executor.set_cwd(working_directory) {
            return queue.send(Message::error("EXECUTOR_ERROR", e.to_string()));
        }
    }
    match executor.run(command) {
        Ok(outcome) => queue.send(Message::ShellResult(ShellResult {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            working_directory: outcome.working_directory,
        })),
        Err(e) => queue.send(Message::error("EXECUTOR_ERROR", e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ShellExecutor;
    use crate::sender;

    #[tokio::test]
    async fn successful_command_emits_shell_result() {
        let (client_io, mut server_io) = tokio::io::duplex(8192);
        let (queue, _task) = sender::spawn(client_io);
        let mut executor = ShellExecutor::new("/tmp");
        handle_command(&mut executor, &queue, "echo hello", "/tmp").unwrap();
        let (tag, _seq, payload) = crate::frame::read_handshake_frame(&mut server_io)
            .await
            .unwrap();
        assert_eq!(tag, 10);
        match Message::decode(tag, &payload).unwrap() {
            Message::ShellResult(r) => {
                assert_eq!(r.exit_code, 0);
                assert_eq!(r.stdout, "hello\n");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn requested_working_directory_is_applied_before_running() {
        let (client_io, mut server_io) = tokio::io::duplex(8192);
        let (queue, _task) = sender::spawn(client_io);
        // Executor starts elsewhere; the SHELL_COMMAND's workingDirectory
        // field must still take effect for this call (spec §8 scenario 1).
        let mut executor = ShellExecutor::new("/");
        handle_command(&mut executor, &queue, "echo hello", "/tmp").unwrap();
        let (tag, _seq, payload) = crate::frame::read_handshake_frame(&mut server_io)
            .await
            .unwrap();
        match Message::decode(tag, &payload).unwrap() {
            Message::ShellResult(r) => {
                assert_eq!(r.working_directory, "/tmp");
                assert_eq!(r.stdout, "hello\n");
            }
            _ => panic!("wrong variant"),
        }
    }
}
