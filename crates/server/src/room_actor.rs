//! Room actor — owns one session's live membership and processes commands
//! sequentially.
//!
//! Each session runs as an independent tokio task; the strict ordering of
//! its command queue is the serialization point that closes the join race
//! and keeps the answer pipeline's steps from interleaving within a
//! session. Unrelated sessions never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use hireloop_protocol::{
    InterviewStatus, Navigation, Participant, Question, QuestionView, Role, ServerMessage,
    TechnicalStatus,
};

use crate::analysis::{clamp_score, AnswerAnalyzer};
use crate::error::EngineError;
use crate::flow::QuestionFlow;
use crate::lifecycle;
use crate::room::{RoomHandle, RoomSnapshot};
use crate::room_command::{JoinAck, RoomCommand};
use crate::scoring::ScoreCoordinator;
use crate::store::{timestamp_now, Store};

const COMMAND_BUFFER: usize = 256;
const BROADCAST_BUFFER: usize = 256;

pub struct RoomActor {
    session_id: String,
    store: Store,
    flow: QuestionFlow,
    scores: ScoreCoordinator,
    analyzer: Arc<dyn AnswerAnalyzer>,
    auto_score_category: String,
    participants: HashMap<String, Role>,
    broadcast_tx: broadcast::Sender<ServerMessage>,
    snapshot: Arc<ArcSwap<RoomSnapshot>>,
    /// Set once the registry-initiated teardown is accepted; joins are
    /// refused from then on so none can strand in an unmapped room.
    closing: bool,
}

impl RoomActor {
    /// Spawn the actor task and return its handle.
    pub fn spawn(
        session_id: String,
        store: Store,
        analyzer: Arc<dyn AnswerAnalyzer>,
        auto_score_category: String,
    ) -> RoomHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_BUFFER);
        let snapshot = Arc::new(ArcSwap::from_pointee(RoomSnapshot::default()));

        let actor = RoomActor {
            session_id: session_id.clone(),
            flow: QuestionFlow::new(store.clone()),
            scores: ScoreCoordinator::new(store.clone()),
            store,
            analyzer,
            auto_score_category,
            participants: HashMap::new(),
            broadcast_tx,
            snapshot: snapshot.clone(),
            closing: false,
        };
        tokio::spawn(actor.run(command_rx));

        RoomHandle::new(session_id, command_tx, snapshot)
    }

    async fn run(mut self, mut command_rx: mpsc::Receiver<RoomCommand>) {
        while let Some(cmd) = command_rx.recv().await {
            self.handle(cmd).await;
        }
        debug!(
            component = "room",
            session_id = %self.session_id,
            "Room actor stopped"
        );
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                user_id,
                role,
                reply,
            } => {
                let ack = self.handle_join(user_id, role).await;
                let _ = reply.send(ack);
            }
            RoomCommand::Leave { user_id, reply } => {
                let _ = reply.send(self.handle_leave(&user_id));
            }
            RoomCommand::Close { reply } => {
                let empty = self.participants.is_empty();
                if empty {
                    self.closing = true;
                }
                let _ = reply.send(empty);
            }
            RoomCommand::StartTest { reply } => {
                let _ = reply.send(self.handle_start_test().await);
            }
            RoomCommand::EndTest { reply } => {
                let _ = reply.send(self.handle_end_test().await);
            }
            RoomCommand::SubmitAnswer {
                question_id,
                candidate_id,
                answer_text,
                question_text,
                reply,
            } => {
                let result = self
                    .handle_submit_answer(&question_id, &candidate_id, &answer_text, &question_text)
                    .await;
                let _ = reply.send(result);
            }
            RoomCommand::NextQuestion {
                follow_up_question,
                reply,
            } => {
                let _ = reply.send(self.handle_next_question(follow_up_question).await);
            }
            RoomCommand::SubmitCategoryScore {
                category_score_id,
                score,
                reply,
            } => {
                let result = self
                    .scores
                    .set_category_score(&self.session_id, &category_score_id, score)
                    .await;
                let _ = reply.send(match result {
                    Ok(bundle) => {
                        self.broadcast_score_bundle(bundle.category_scores, bundle.total_score);
                        Ok(())
                    }
                    Err(e) => Err(e),
                });
            }
            RoomCommand::SubmitSubCategoryScore {
                sub_category_score_id,
                score,
                reply,
            } => {
                let result = self
                    .scores
                    .set_sub_category_score(&self.session_id, &sub_category_score_id, score)
                    .await;
                let _ = reply.send(match result {
                    Ok(bundle) => {
                        self.broadcast_score_bundle(bundle.category_scores, bundle.total_score);
                        Ok(())
                    }
                    Err(e) => Err(e),
                });
            }
            RoomCommand::Chat {
                message,
                sender_id,
                sender_role,
            } => {
                self.broadcast(ServerMessage::ReceiveMessage {
                    message: hireloop_protocol::ChatMessage {
                        session_id: self.session_id.clone(),
                        message,
                        sender_id,
                        sender_role,
                        sent_at: timestamp_now(),
                    },
                });
            }
            RoomCommand::Typing { text } => {
                self.broadcast(ServerMessage::TypingUpdate {
                    session_id: self.session_id.clone(),
                    text,
                });
            }
            RoomCommand::VideoJoin { peer_id } => {
                self.broadcast(ServerMessage::PeerJoined {
                    joined_session_id: self.session_id.clone(),
                    peer_id,
                });
            }
        }
    }

    // -- Presence ----------------------------------------------------------

    async fn handle_join(&mut self, user_id: String, role: Role) -> Result<JoinAck, EngineError> {
        if self.closing {
            return Err(EngineError::Closed);
        }

        // All fallible reads come first; membership only changes once the
        // full ack is assembled, so a storage failure leaves no ghost
        // entry behind for a caller that was told the join failed.
        if lifecycle::has_both_roles(self.participants.values().chain(std::iter::once(&role))) {
            self.start_if_pending().await?;
        }

        let questions = self.flow.list_all(&self.session_id).await?;
        let technical_status = technical_of(&questions);
        let bundle = self.scores.refresh(&self.session_id).await?;

        // Keyed by user id: a reconnect replaces the prior entry instead
        // of duplicating the same person.
        self.participants.insert(user_id.clone(), role);
        self.refresh_snapshot();

        self.broadcast(ServerMessage::ParticipantJoined {
            session_id: self.session_id.clone(),
            participant: Participant { user_id, role },
        });
        self.broadcast(ServerMessage::TechnicalStatus {
            session_id: self.session_id.clone(),
            technical_status,
        });

        Ok(JoinAck {
            rx: self.broadcast_tx.subscribe(),
            questions,
            category_scores: bundle.category_scores,
            total_score: bundle.total_score,
            technical_status,
            has_other_participants: self.participants.len() > 1,
        })
    }

    fn handle_leave(&mut self, user_id: &str) -> usize {
        if self.participants.remove(user_id).is_some() {
            self.refresh_snapshot();
            self.broadcast(ServerMessage::ParticipantLeft {
                session_id: self.session_id.clone(),
                user_id: user_id.to_string(),
            });
        }
        self.participants.len()
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Advance to Ongoing if the persisted status still allows it. The
    /// conditional write plus this actor's serialization make the
    /// transition fire exactly once no matter how many joins race.
    async fn start_if_pending(&self) -> Result<(), EngineError> {
        let advanced = self
            .store
            .advance_interview_status(
                &self.session_id,
                InterviewStatus::ToBeConducted,
                InterviewStatus::Ongoing,
            )
            .await?;
        if advanced {
            info!(
                component = "room",
                event = "session.started",
                session_id = %self.session_id,
                "Interview advanced to ongoing"
            );
        }
        Ok(())
    }

    async fn handle_start_test(&self) -> Result<(), EngineError> {
        // Company override: same advance, independent of who is present.
        // Already-ongoing is not an error.
        self.start_if_pending().await
    }

    async fn handle_end_test(&mut self) -> Result<(), EngineError> {
        let completed = self.store.complete_interview(&self.session_id).await?;
        if completed {
            info!(
                component = "room",
                event = "session.completed",
                session_id = %self.session_id,
                "Interview completed by operator override"
            );
        }
        let questions = self.flow.list_all(&self.session_id).await?;
        self.broadcast(ServerMessage::TechnicalStatus {
            session_id: self.session_id.clone(),
            technical_status: technical_of(&questions),
        });
        Ok(())
    }

    // -- Answer pipeline ---------------------------------------------------

    async fn handle_submit_answer(
        &mut self,
        question_id: &str,
        candidate_id: &str,
        answer_text: &str,
        question_text: &str,
    ) -> Result<(), EngineError> {
        let before = self.flow.list_all(&self.session_id).await?;
        if !before.iter().any(|v| v.question.question_id == question_id) {
            return Err(EngineError::NotFound(format!(
                "unknown question {question_id}"
            )));
        }
        let was_completed = technical_of(&before) == TechnicalStatus::Completed;

        // Step 1: close the question before scoring so a concurrent
        // next_unanswered never re-serves it.
        self.store
            .mark_answered(&self.session_id, question_id)
            .await?;

        // Step 2: atomic upsert — the answer survives whatever happens next.
        let answer = self
            .store
            .upsert_answer(&self.session_id, question_id, candidate_id, answer_text)
            .await?;

        // Step 3: the failure-prone step. On error the room still gets a
        // consistent (stale) refresh and the caller a generic error.
        let analysis = match self.analyzer.analyze(question_text, answer_text).await {
            Ok(analysis) => analysis,
            Err(e) => {
                error!(
                    component = "room",
                    event = "answer.analysis_failed",
                    session_id = %self.session_id,
                    question_id = %question_id,
                    error = %e,
                    "Answer analysis failed; answer persisted, scores unchanged"
                );
                self.broadcast_question_state().await?;
                return Err(EngineError::Analysis(e.to_string()));
            }
        };

        // Steps 4-5: score upsert, then category rollup + total as a unit.
        // A failure here gets the same stale-but-consistent refresh as a
        // failed analysis; the room is never left silently out of date.
        let scored: anyhow::Result<crate::scoring::ScoreBundle> = async {
            self.store
                .upsert_score(&answer.response_id, clamp_score(analysis.relevance_score))
                .await?;
            self.scores
                .apply_auto_score(&self.session_id, &self.auto_score_category)
                .await
        }
        .await;
        let bundle = match scored {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(
                    component = "room",
                    event = "answer.scoring_failed",
                    session_id = %self.session_id,
                    question_id = %question_id,
                    error = %e,
                    "Score rollup failed; answer persisted, scores incomplete"
                );
                self.broadcast_question_state().await?;
                return Err(EngineError::Storage(e));
            }
        };

        // Steps 6-7: fan out the new canonical state.
        let questions = self.flow.list_all(&self.session_id).await?;
        let technical_status = technical_of(&questions);

        self.broadcast(ServerMessage::Questions {
            session_id: self.session_id.clone(),
            questions,
        });
        self.broadcast_score_bundle(bundle.category_scores, bundle.total_score);
        self.broadcast(ServerMessage::AnswerSubmitted {
            session_id: self.session_id.clone(),
            question_id: question_id.to_string(),
            response_id: answer.response_id,
            analysis,
        });
        self.broadcast(ServerMessage::TechnicalStatus {
            session_id: self.session_id.clone(),
            technical_status,
        });

        // Terminal signal, once: only the submission that closed the last
        // open question emits it.
        if technical_status == TechnicalStatus::Completed && !was_completed {
            self.broadcast(ServerMessage::TestEnd {
                session_id: self.session_id.clone(),
            });
        }
        Ok(())
    }

    // -- Question flow -----------------------------------------------------

    async fn handle_next_question(
        &mut self,
        follow_up_question: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(text) = follow_up_question {
            let question = self.flow.insert_follow_up(&self.session_id, &text).await?;
            self.broadcast(ServerMessage::Question {
                session_id: self.session_id.clone(),
                question,
            });
            // Queue changed; push the canonical list too.
            let questions = self.flow.list_all(&self.session_id).await?;
            self.broadcast(ServerMessage::Questions {
                session_id: self.session_id.clone(),
                questions,
            });
        }

        let next = self.flow.next_unanswered(&self.session_id).await?;
        self.broadcast(ServerMessage::NavigateNextQuestion {
            session_id: self.session_id.clone(),
            navigation: if next.is_some() {
                Navigation::Question
            } else {
                Navigation::End
            },
            question: next,
        });
        Ok(())
    }

    // -- Helpers -----------------------------------------------------------

    fn refresh_snapshot(&self) {
        let participants = self
            .participants
            .iter()
            .map(|(user_id, role)| Participant {
                user_id: user_id.clone(),
                role: *role,
            })
            .collect();
        self.snapshot.store(Arc::new(RoomSnapshot { participants }));
    }

    /// At-most-once fan-out; subscribers that disconnected mid-broadcast
    /// are simply gone, no retry.
    fn broadcast(&self, msg: ServerMessage) {
        let _ = self.broadcast_tx.send(msg);
    }

    fn broadcast_score_bundle(
        &self,
        category_scores: Vec<hireloop_protocol::CategoryScore>,
        total_score: f64,
    ) {
        self.broadcast(ServerMessage::CategoryScores {
            session_id: self.session_id.clone(),
            category_scores,
        });
        self.broadcast(ServerMessage::TotalScore {
            session_id: self.session_id.clone(),
            total_score,
        });
    }

    async fn broadcast_question_state(&self) -> Result<(), EngineError> {
        let questions = self.flow.list_all(&self.session_id).await?;
        let technical_status = technical_of(&questions);
        self.broadcast(ServerMessage::Questions {
            session_id: self.session_id.clone(),
            questions,
        });
        self.broadcast(ServerMessage::TechnicalStatus {
            session_id: self.session_id.clone(),
            technical_status,
        });
        Ok(())
    }
}

fn technical_of(views: &[QuestionView]) -> TechnicalStatus {
    let questions: Vec<Question> = views.iter().map(|v| v.question.clone()).collect();
    lifecycle::technical_status(&questions)
}
