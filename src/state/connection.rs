//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::auth::SCRAM_SHA_256;
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, NegotiateProtocolVersion,
    NoticeResponse, ParameterStatus, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::{
    md5_password, write_password, write_sasl_initial_response, write_sasl_response, write_startup,
};
use crate::protocol::types::TransactionStatus;
use crate::scram::ScramClient;

use super::{Action, MessageBudget, StateMachine};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    /// StartupMessage sent, waiting for the first authentication request
    WaitingAuth,
    /// SASLInitialResponse sent, waiting for server-first-message
    WaitingSaslContinue,
    /// SASLResponse sent, waiting for server-final-message
    WaitingSaslFinal,
    /// Credentials sent, waiting for AuthenticationOk
    WaitingAuthOk,
    /// Authenticated, collecting ParameterStatus/BackendKeyData
    WaitingReady,
    Ready,
    Failed,
}

/// Connection startup state machine.
pub struct ConnectionStateMachine<'a> {
    state: ConnectionState,
    opts: &'a Opts,
    budget: MessageBudget,
    scram: Option<ScramClient>,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
}

impl<'a> ConnectionStateMachine<'a> {
    pub fn new(opts: &'a Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            opts,
            budget: MessageBudget::new("startup", opts.message_limit),
            scram: None,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    /// Take the parameters reported during startup, in arrival order.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    fn password(&self) -> Result<&'a str> {
        self.opts
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("server requested a password but none was provided".into()))
    }

    fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        self.budget.count(type_byte)?;

        match type_byte {
            msg_type::ERROR_RESPONSE => {
                return Err(ErrorResponse::parse(&buffer_set.read_buffer)?.into_error());
            }
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(&buffer_set.read_buffer)?;
                tracing::warn!("notice during startup: {}", notice.0);
                return Ok(Action::ReadMessage);
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                let negotiate = NegotiateProtocolVersion::parse(&buffer_set.read_buffer)?;
                tracing::warn!(
                    "server supports protocol 3.{} only; unrecognized options: {:?}",
                    negotiate.newest_minor_version,
                    negotiate.unrecognized_options
                );
                return Ok(Action::ReadMessage);
            }
            _ => {}
        }

        match self.state {
            ConnectionState::WaitingAuth => self.handle_auth_request(buffer_set),
            ConnectionState::WaitingSaslContinue => self.handle_sasl_continue(buffer_set),
            ConnectionState::WaitingSaslFinal => self.handle_sasl_final(buffer_set),
            ConnectionState::WaitingAuthOk => self.handle_auth_ok(buffer_set),
            ConnectionState::WaitingReady => self.handle_ready(buffer_set),
            ConnectionState::Initial | ConnectionState::Ready | ConnectionState::Failed => {
                Err(Error::Protocol(format!(
                    "unexpected message '{}' in state {:?}",
                    type_byte as char, self.state
                )))
            }
        }
    }

    fn handle_auth_request(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let auth = read_auth(buffer_set)?;
        let name = auth.name();
        tracing::debug!("authentication request: {name}");

        let mut out = Vec::new();
        match auth {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                return Ok(Action::ReadMessage);
            }
            AuthenticationMessage::CleartextPassword => {
                write_password(&mut out, self.password()?);
                self.state = ConnectionState::WaitingAuthOk;
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.opts.user, self.password()?, &salt);
                write_password(&mut out, &hashed);
                self.state = ConnectionState::WaitingAuthOk;
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism; server offers {:?}",
                        mechanisms
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                write_sasl_initial_response(
                    &mut out,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram = Some(scram);
                self.state = ConnectionState::WaitingSaslContinue;
            }
            AuthenticationMessage::SaslContinue { .. } | AuthenticationMessage::SaslFinal { .. } => {
                return Err(Error::Protocol(format!(
                    "{name} received before SASL was negotiated"
                )));
            }
            AuthenticationMessage::KerberosV5
            | AuthenticationMessage::Gss
            | AuthenticationMessage::GssContinue { .. }
            | AuthenticationMessage::Sspi => {
                return Err(Error::Unsupported(format!("authentication method {name}")));
            }
        }

        buffer_set.write_buffer.extend_from_slice(&out);
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_sasl_continue(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let scram = self
            .scram
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM exchange not started".into()))?;

        let auth = read_auth(buffer_set)?;
        let name = auth.name();
        let AuthenticationMessage::SaslContinue { data } = auth else {
            return Err(Error::Auth(format!(
                "expected AuthenticationSASLContinue, got {name}"
            )));
        };
        let client_final = scram.client_final_message(data)?;

        write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
        self.state = ConnectionState::WaitingSaslFinal;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_sasl_final(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let auth = read_auth(buffer_set)?;
        let name = auth.name();
        let AuthenticationMessage::SaslFinal { data } = auth else {
            return Err(Error::Auth(format!(
                "expected AuthenticationSASLFinal, got {name}"
            )));
        };

        let scram = self
            .scram
            .take()
            .ok_or_else(|| Error::Protocol("SCRAM exchange not started".into()))?;
        scram.verify_server_final(data)?;

        self.state = ConnectionState::WaitingAuthOk;
        Ok(Action::ReadMessage)
    }

    fn handle_auth_ok(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match read_auth(buffer_set)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!(
                "expected AuthenticationOk, got {}",
                other.name()
            ))),
        }
    }

    fn handle_ready(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                self.backend_key = Some(BackendKeyData::parse(payload)?);
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                set_param(&mut self.server_params, param.name, param.value);
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
                self.state = ConnectionState::Ready;
                return Ok(Action::Finished);
            }
            other => {
                tracing::debug!("skipping message '{}' during startup", other as char);
            }
        }
        Ok(Action::ReadMessage)
    }
}

impl StateMachine for ConnectionStateMachine<'_> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == ConnectionState::Initial {
            buffer_set.write_buffer.clear();
            write_startup(&mut buffer_set.write_buffer, &self.opts.startup_params());
            self.state = ConnectionState::WaitingAuth;
            return Ok(Action::WriteAndReadMessage);
        }

        let result = self.handle(buffer_set);
        if result.is_err() {
            self.state = ConnectionState::Failed;
            self.scram = None;
        }
        result
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

fn read_auth(buffer_set: &BufferSet) -> Result<AuthenticationMessage<'_>> {
    if buffer_set.type_byte != msg_type::AUTHENTICATION {
        return Err(Error::Protocol(format!(
            "expected Authentication message, got '{}'",
            buffer_set.type_byte as char
        )));
    }
    AuthenticationMessage::parse(&buffer_set.read_buffer)
}

/// Insert or update a server parameter, keeping arrival order.
pub(crate) fn set_param(params: &mut Vec<(String, String)>, name: &str, value: &str) {
    match params.iter_mut().find(|(n, _)| n == name) {
        Some(entry) => entry.1 = value.to_string(),
        None => params.push((name.to_string(), value.to_string())),
    }
}
