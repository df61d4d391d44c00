//! Line-oriented console front end.
//!
//! Commands:
//! ```text
//! add <nome>;<local>;<capacidade>;<equipamentos>;<responsável>;<status>
//! sample                 add a random demo laboratory
//! status <n> <status>    change the status of row n
//! del <n>                delete row n
//! reset                  start a new anonymous session
//! dismiss                hide the current banner
//! list | help | quit
//! ```

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use labsync_core::{DocumentStore, IdentityService, LabForm, LabPatch, LabStatus};

use crate::controller::AppController;
use crate::render;

const TICK: Duration = Duration::from_millis(500);

const HELP: &str = "\
Comandos:
  add <nome>;<local>;<capacidade>;<equipamentos>;<responsável>;<status>
  sample                 adicionar laboratório de exemplo
  status <n> <status>    alterar status da linha n (active, maintenance, closed)
  del <n>                excluir a linha n
  reset                  nova sessão anônima
  dismiss                fechar a mensagem
  list | help | quit
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(LabForm),
    Sample,
    SetStatus { row: usize, status: LabStatus },
    Delete { row: usize },
    Reset,
    Dismiss,
    List,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match word {
            "add" => Ok(Command::Add(parse_form(rest))),
            "sample" => Ok(Command::Sample),
            "status" => {
                let (row, status) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| "uso: status <n> <status>".to_string())?;
                let status = LabStatus::parse(status).ok_or_else(|| format!("status desconhecido: {}", status.trim()))?;
                Ok(Command::SetStatus {
                    row: parse_row(row)?,
                    status,
                })
            }
            "del" | "delete" => Ok(Command::Delete { row: parse_row(rest)? }),
            "reset" => Ok(Command::Reset),
            "dismiss" => Ok(Command::Dismiss),
            "list" | "" => Ok(Command::List),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("comando desconhecido: {other}")),
        }
    }
}

/// Fields separated by `;`, in form order. Missing trailing fields stay empty.
fn parse_form(args: &str) -> LabForm {
    let mut parts = args.split(';').map(|part| part.trim().to_string());
    let mut next = || parts.next().unwrap_or_default();
    LabForm {
        name: next(),
        location: next(),
        capacity: next(),
        equipment_count: next(),
        responsible: next(),
        status: next(),
    }
}

fn parse_row(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(row) if row > 0 => Ok(row),
        _ => Err(format!("linha inválida: {}", raw.trim())),
    }
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run<S, P>(controller: &AppController<S, P>) -> std::io::Result<()>
where
    S: DocumentStore + 'static,
    P: IdentityService + 'static,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut ticker = tokio::time::interval(TICK);

    print_screen(&mut stdout, controller).await?;
    stdout.write_all(HELP.as_bytes()).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(Command::Help) => stdout.write_all(HELP.as_bytes()).await?,
                    Ok(command) => {
                        execute(controller, command).await;
                        print_screen(&mut stdout, controller).await?;
                    }
                    Err(message) => {
                        stdout.write_all(format!("{message}\n").as_bytes()).await?;
                    }
                }
                stdout.flush().await?;
            }
            _ = ticker.tick() => {
                if controller.tick() {
                    print_screen(&mut stdout, controller).await?;
                }
            }
        }
    }

    controller.shutdown();
    Ok(())
}

async fn execute<S, P>(controller: &AppController<S, P>, command: Command)
where
    S: DocumentStore + 'static,
    P: IdentityService + 'static,
{
    // Failures are already reported through the banner.
    match command {
        Command::Add(form) => {
            let _ = controller.add_lab(&form).await;
        }
        Command::Sample => {
            let _ = controller.add_sample().await;
        }
        Command::SetStatus { row, status } => {
            if let Some(record) = controller.records().get(row - 1) {
                let _ = controller.update_lab(&record.id, LabPatch::status(status)).await;
            }
        }
        Command::Delete { row } => {
            if let Some(record) = controller.records().get(row - 1) {
                let _ = controller.delete_lab(&record.id).await;
            }
        }
        Command::Reset => {
            let _ = controller.reset_session().await;
        }
        Command::Dismiss => {
            controller.dismiss_banner();
        }
        Command::List | Command::Help | Command::Quit => {}
    }
}

async fn print_screen<S, P>(stdout: &mut tokio::io::Stdout, controller: &AppController<S, P>) -> std::io::Result<()>
where
    S: DocumentStore + 'static,
    P: IdentityService + 'static,
{
    let screen = render::screen(
        &controller.user_label(),
        controller.banner().as_ref(),
        &controller.stats(),
        &controller.records(),
    );
    stdout.write_all(screen.as_bytes()).await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_scenario() {
        let command = Command::parse("add Lab A;;30;;;closed").unwrap();
        assert_eq!(
            command,
            Command::Add(LabForm {
                name: "Lab A".into(),
                capacity: "30".into(),
                status: "closed".into(),
                ..LabForm::default()
            })
        );
    }

    #[test]
    fn test_parse_add_partial_fields() {
        match Command::parse("add  Lab Física ; Bloco C").unwrap() {
            Command::Add(form) => {
                assert_eq!(form.name, "Lab Física");
                assert_eq!(form.location, "Bloco C");
                assert!(form.capacity.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_row_commands() {
        assert_eq!(Command::parse("del 2").unwrap(), Command::Delete { row: 2 });
        assert_eq!(
            Command::parse("status 1 maintenance").unwrap(),
            Command::SetStatus {
                row: 1,
                status: LabStatus::Maintenance
            }
        );
        assert!(Command::parse("del 0").is_err());
        assert!(Command::parse("del x").is_err());
        assert!(Command::parse("status 1 demolido").is_err());
        assert!(Command::parse("status 1").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("sample").unwrap(), Command::Sample);
        assert_eq!(Command::parse("").unwrap(), Command::List);
        assert_eq!(Command::parse("  quit ").unwrap(), Command::Quit);
        assert!(Command::parse("voar").is_err());
    }
}
