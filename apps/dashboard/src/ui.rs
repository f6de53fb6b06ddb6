//! Interactive `watch` loop: renders backend events and turns typed lines into commands.

use std::{
    io::{self, BufRead, IsTerminal, Write},
    thread,
};

use anyhow::{Context, Result};
use client_core::DashboardClient;
use crossbeam_channel::{bounded, never, select, unbounded, Receiver};
use shared::domain::InvoiceId;

use crate::{
    backend_bridge::{self, commands::BackendCommand},
    config::Settings,
    controller::{
        events::UiEvent,
        intents::{is_affirmative, needs_confirmation, parse_intent, to_command, Intent, HELP},
        orchestration::dispatch_backend_command,
    },
    view::PresentationBinding,
};

enum Input {
    Event(UiEvent),
    Line(String),
    StdinClosed,
    BackendGone,
}

pub fn run_watch(settings: &Settings, invoice_id: InvoiceId) -> Result<()> {
    let client = DashboardClient::new(settings.api_base()?);
    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(256);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(2048);
    let worker = backend_bridge::runtime::launch(client, settings.session_options(), cmd_rx, ui_tx);

    let mut view = PresentationBinding::new();
    dispatch_backend_command(&cmd_tx, BackendCommand::Open { invoice_id }, view.status_mut());
    dispatch_backend_command(&cmd_tx, BackendCommand::Refresh, view.status_mut());

    let mut lines = spawn_stdin_reader();
    let mut awaiting_confirmation: Option<BackendCommand> = None;
    redraw(&view)?;

    loop {
        let input = select! {
            recv(ui_rx) -> event => event.map_or(Input::BackendGone, Input::Event),
            recv(lines) -> line => line.map_or(Input::StdinClosed, Input::Line),
        };
        match input {
            Input::Event(event) => view.apply(event),
            Input::BackendGone => break,
            // keep following the stream until interrupted
            Input::StdinClosed => lines = never(),
            Input::Line(line) => {
                if let Some(cmd) = awaiting_confirmation.take() {
                    if is_affirmative(&line) {
                        dispatch_backend_command(&cmd_tx, cmd, view.status_mut());
                    } else {
                        view.set_status("cancelled");
                    }
                } else {
                    match parse_intent(&line) {
                        Ok(None) => {}
                        Ok(Some(Intent::Quit)) => break,
                        Ok(Some(Intent::Help)) => view.set_status(HELP),
                        Ok(Some(intent)) => match to_command(intent, view.tasks(), view.invoice_id()) {
                            Ok(cmd) if needs_confirmation(&cmd) => {
                                if let BackendCommand::Act { task_id, .. } = &cmd {
                                    view.set_status(format!("reject task {task_id}? [y/N]"));
                                }
                                awaiting_confirmation = Some(cmd);
                            }
                            Ok(cmd) => dispatch_backend_command(&cmd_tx, cmd, view.status_mut()),
                            Err(message) => view.set_status(message),
                        },
                        Err(message) => view.set_status(message),
                    }
                }
            }
        }
        redraw(&view)?;
    }

    let _ = cmd_tx.try_send(BackendCommand::Shutdown);
    drop(cmd_tx);
    if worker.join().is_err() {
        tracing::error!("backend worker panicked");
    }
    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (line_tx, line_rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    line_rx
}

fn redraw(view: &PresentationBinding) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if stdout.is_terminal() {
        write!(stdout, "\x1b[2J\x1b[H").context("failed to clear terminal")?;
    }
    write!(stdout, "{}", view.render()).context("failed to write view")?;
    stdout.flush().context("failed to flush view")
}
