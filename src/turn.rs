use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::client::ChatClient;
use crate::protocol::WireMessage;
use crate::state::{ChatAction, ChatState, Submission, TurnId};

/// Runs at most one chat turn at a time in the background.
///
/// Starting a turn aborts the one before it. Results come back as
/// [`ChatAction`]s tagged with their turn, so the state can drop anything a
/// superseded task managed to send before it was aborted.
pub struct TurnRunner {
    client: Arc<ChatClient>,
    actions: UnboundedSender<ChatAction>,
    current: Option<(TurnId, JoinHandle<()>)>,
}

impl TurnRunner {
    pub fn new(client: Arc<ChatClient>, actions: UnboundedSender<ChatAction>) -> Self {
        Self {
            client,
            actions,
            current: None,
        }
    }

    pub fn start(&mut self, submission: Submission) {
        self.cancel();

        let Submission {
            turn,
            message_id,
            history,
        } = submission;
        tracing::debug!(%turn, %message_id, "starting chat turn");

        let client = Arc::clone(&self.client);
        let actions = self.actions.clone();
        let task = tokio::spawn(async move {
            run_turn(&client, turn, history, &actions).await;
        });
        self.current = Some((turn, task));
    }

    pub fn cancel(&mut self) {
        if let Some((turn, task)) = self.current.take() {
            if !task.is_finished() {
                tracing::debug!(%turn, "aborting chat turn");
            }
            task.abort();
        }
    }
}

impl Drop for TurnRunner {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Streams one turn, reporting every event and then exactly one terminal action.
pub async fn run_turn(
    client: &ChatClient,
    turn: TurnId,
    history: Vec<WireMessage>,
    actions: &UnboundedSender<ChatAction>,
) {
    let result = client
        .stream_chat(history, |event| {
            let _ = actions.send(ChatAction::Event { turn, event });
        })
        .await;

    let action = match result {
        Ok(()) => ChatAction::Completed { turn },
        Err(err) => ChatAction::Failed {
            turn,
            reason: err.to_string(),
        },
    };
    let _ = actions.send(action);
}

/// Runs a single turn in the background. The sender lives inside the task, so
/// the receiver closes once the task is gone, whether it finished or panicked.
pub fn spawn_turn(
    client: Arc<ChatClient>,
    submission: Submission,
) -> UnboundedReceiver<ChatAction> {
    let (actions, receiver) = mpsc::unbounded_channel();
    let Submission {
        turn,
        message_id,
        history,
    } = submission;
    tracing::debug!(%turn, %message_id, "starting one-shot chat turn");

    tokio::spawn(async move {
        run_turn(&client, turn, history, &actions).await;
    });
    receiver
}

/// Applies actions until `turn` is over, showing each one to `on_action` first.
///
/// A channel that closes before a terminal action fails the turn.
pub async fn drain_turn<F, E>(
    state: &mut ChatState,
    turn: TurnId,
    actions: &mut UnboundedReceiver<ChatAction>,
    mut on_action: F,
) -> Result<(), E>
where
    F: FnMut(&ChatAction) -> Result<(), E>,
{
    while state.current_turn() == Some(turn) {
        let action = match actions.recv().await {
            Some(action) => action,
            None => {
                tracing::warn!(%turn, "chat turn ended without a result");
                ChatAction::Failed {
                    turn,
                    reason: "turn task ended without a result".to_string(),
                }
            }
        };
        if action.turn() == turn {
            on_action(&action)?;
        }
        state.apply(action);
    }
    Ok(())
}
