use crate::{
    error::BackendError,
    types::{BackendCommand, BackendEvent, BackendLifecycleState},
};

#[derive(Debug, Clone)]
pub struct BackendStateMachine {
    state: BackendLifecycleState,
}

impl Default for BackendStateMachine {
    fn default() -> Self {
        Self {
            state: BackendLifecycleState::Cold,
        }
    }
}

impl BackendStateMachine {
    pub fn state(&self) -> BackendLifecycleState {
        self.state
    }

    pub fn apply(&mut self, command: &BackendCommand) -> Result<Vec<BackendEvent>, BackendError> {
        use BackendCommand::*;

        match command {
            Init { .. } => self.transition_from_cold(BackendLifecycleState::Configured, "init"),
            LoginPassword { .. } | RestoreSession => self.transition_from_any_of(
                &[
                    BackendLifecycleState::Configured,
                    BackendLifecycleState::LoggedOut,
                ],
                BackendLifecycleState::Authenticating,
                "login_or_restore",
            ),
            Logout => self.transition_from_any_of(
                &[
                    BackendLifecycleState::Configured,
                    BackendLifecycleState::Authenticating,
                    BackendLifecycleState::Authenticated,
                    BackendLifecycleState::LoggedOut,
                ],
                BackendLifecycleState::LoggedOut,
                "logout",
            ),
            ListThreads
            | OpenThread { .. }
            | RefreshThread { .. }
            | CloseThread { .. }
            | SendMessage { .. }
            | StartConversation { .. }
            | ListMembers { .. }
            | GetMember { .. }
            | ListMatches
            | ListActivity { .. }
            | GetProfile { .. } => {
                if self.state == BackendLifecycleState::Authenticated {
                    Ok(Vec::new())
                } else {
                    Err(BackendError::invalid_state(self.state, command.kind()))
                }
            }
        }
    }

    pub fn on_auth_result(&mut self, success: bool) -> Result<BackendEvent, BackendError> {
        if self.state != BackendLifecycleState::Authenticating {
            return Err(BackendError::invalid_state(self.state, "on_auth_result"));
        }

        let next = if success {
            BackendLifecycleState::Authenticated
        } else {
            BackendLifecycleState::Configured
        };

        self.state = next;
        Ok(BackendEvent::StateChanged { state: next })
    }

    /// The server rejected the token mid-session.
    pub fn on_session_expired(&mut self) -> Option<BackendEvent> {
        if self.state != BackendLifecycleState::Authenticated {
            return None;
        }
        self.state = BackendLifecycleState::LoggedOut;
        Some(BackendEvent::StateChanged {
            state: BackendLifecycleState::LoggedOut,
        })
    }

    fn transition_from_cold(
        &mut self,
        next: BackendLifecycleState,
        action: &str,
    ) -> Result<Vec<BackendEvent>, BackendError> {
        if self.state != BackendLifecycleState::Cold {
            return Err(BackendError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![BackendEvent::StateChanged { state: next }])
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[BackendLifecycleState],
        next: BackendLifecycleState,
        action: &str,
    ) -> Result<Vec<BackendEvent>, BackendError> {
        if !expected.contains(&self.state) {
            return Err(BackendError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(vec![BackendEvent::StateChanged { state: next }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProfileTarget;

    fn init_command() -> BackendCommand {
        BackendCommand::Init {
            base_url: "https://example.org/wp-json".to_owned(),
            config: None,
        }
    }

    fn authenticated() -> BackendStateMachine {
        let mut sm = BackendStateMachine::default();
        sm.apply(&init_command()).expect("init must work");
        sm.apply(&BackendCommand::RestoreSession)
            .expect("restore must work");
        sm.on_auth_result(true).expect("auth should resolve");
        sm
    }

    #[test]
    fn runs_happy_path_state_transitions() {
        let mut sm = BackendStateMachine::default();

        sm.apply(&init_command()).expect("init must work");
        assert_eq!(sm.state(), BackendLifecycleState::Configured);

        sm.apply(&BackendCommand::LoginPassword {
            username: "aneta".into(),
            password: "secret".into(),
        })
        .expect("login command must work");
        assert_eq!(sm.state(), BackendLifecycleState::Authenticating);

        sm.on_auth_result(true).expect("auth should resolve");
        assert_eq!(sm.state(), BackendLifecycleState::Authenticated);

        let events = sm
            .apply(&BackendCommand::OpenThread { thread_id: 7 })
            .expect("open thread should work");
        assert!(events.is_empty());
        assert_eq!(sm.state(), BackendLifecycleState::Authenticated);

        sm.apply(&BackendCommand::Logout)
            .expect("logout should work");
        assert_eq!(sm.state(), BackendLifecycleState::LoggedOut);

        sm.apply(&BackendCommand::RestoreSession)
            .expect("login after logout should work");
        assert_eq!(sm.state(), BackendLifecycleState::Authenticating);
    }

    #[test]
    fn failed_auth_returns_to_configured() {
        let mut sm = BackendStateMachine::default();
        sm.apply(&init_command()).expect("init must work");
        sm.apply(&BackendCommand::RestoreSession)
            .expect("restore must work");

        let event = sm.on_auth_result(false).expect("auth should resolve");
        assert_eq!(
            event,
            BackendEvent::StateChanged {
                state: BackendLifecycleState::Configured
            }
        );
    }

    #[test]
    fn rejects_thread_commands_outside_authenticated_context() {
        let mut sm = BackendStateMachine::default();
        sm.apply(&init_command()).expect("init must work");

        let err = sm
            .apply(&BackendCommand::SendMessage {
                thread_id: 7,
                body: "hello".into(),
            })
            .expect_err("send should fail when not authenticated");
        assert_eq!(err.code, "invalid_state_transition");
        assert!(err.message.contains("send_message"));

        let err = sm
            .apply(&BackendCommand::GetProfile {
                user: ProfileTarget::Me,
            })
            .expect_err("profile should fail when not authenticated");
        assert!(err.message.contains("get_profile"));
    }

    #[test]
    fn rejects_second_init() {
        let mut sm = BackendStateMachine::default();
        sm.apply(&init_command()).expect("init must work");
        let err = sm.apply(&init_command()).expect_err("second init must fail");
        assert_eq!(err.code, "invalid_state_transition");
    }

    #[test]
    fn session_expiry_logs_out_only_when_authenticated() {
        let mut sm = authenticated();
        assert_eq!(
            sm.on_session_expired(),
            Some(BackendEvent::StateChanged {
                state: BackendLifecycleState::LoggedOut
            })
        );
        assert_eq!(sm.on_session_expired(), None);
        assert!(sm.apply(&BackendCommand::ListThreads).is_err());
    }
}
