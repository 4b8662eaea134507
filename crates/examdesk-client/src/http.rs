//! HTTP backend for the exam service REST API.
//!
//! Student routes live under `/api/exams/{exam}/session`, grader routes
//! under `/api/exams/{exam}/students/{student}`. Every request carries the
//! configured bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use examdesk_core::error::ServiceError;
use examdesk_core::model::{
    Answer, AnswerUpdate, AttendanceRecord, ExamId, ScoreEntry, Session, SessionPaper, StudentId,
};
use examdesk_core::traits::{GraderService, SessionService};

use crate::error;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for a remote exam service.
pub struct HttpExamService {
    base_url: String,
    api_token: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EnterRequest<'a> {
    token: &'a str,
}

impl HttpExamService {
    pub fn new(base_url: &str, api_token: &str, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            timeout_secs,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        let response = req
            .send()
            .await
            .map_err(|e| error::from_transport(e, self.timeout_secs))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %body, "exam service returned an error");
        Err(error::from_response(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ServiceError> {
        let response = self.send(req).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::Network(format!("failed to parse response: {e}")))
    }

    async fn send_empty(&self, req: RequestBuilder) -> Result<(), ServiceError> {
        self.send(req).await.map(|_| ())
    }
}

fn session_path(exam_id: ExamId, rest: &str) -> String {
    format!("/api/exams/{exam_id}/session{rest}")
}

fn student_path(exam_id: ExamId, student_id: StudentId, rest: &str) -> String {
    format!("/api/exams/{exam_id}/students/{student_id}{rest}")
}

#[async_trait]
impl SessionService for HttpExamService {
    #[instrument(skip(self, token))]
    async fn enter_session(&self, exam_id: ExamId, token: &str) -> Result<Session, ServiceError> {
        let req = self
            .request(Method::POST, &session_path(exam_id, "/enter"))
            .json(&EnterRequest { token });
        self.send_json(req).await
    }

    #[instrument(skip(self))]
    async fn get_session(&self, exam_id: ExamId) -> Result<Session, ServiceError> {
        self.send_json(self.request(Method::GET, &session_path(exam_id, "")))
            .await
    }

    #[instrument(skip(self))]
    async fn get_session_questions(&self, exam_id: ExamId) -> Result<SessionPaper, ServiceError> {
        self.send_json(self.request(Method::GET, &session_path(exam_id, "/questions")))
            .await
    }

    #[instrument(skip(self))]
    async fn get_saved_answers(&self, exam_id: ExamId) -> Result<Vec<Answer>, ServiceError> {
        self.send_json(self.request(Method::GET, &session_path(exam_id, "/answers")))
            .await
    }

    #[instrument(skip(self, update), fields(question_id = update.question_id()))]
    async fn upsert_answer(
        &self,
        exam_id: ExamId,
        update: &AnswerUpdate,
    ) -> Result<(), ServiceError> {
        let path = session_path(exam_id, &format!("/answers/{}", update.question_id()));
        self.send_empty(self.request(Method::PUT, &path).json(update))
            .await
    }

    #[instrument(skip(self))]
    async fn finish_session(&self, exam_id: ExamId) -> Result<(), ServiceError> {
        self.send_empty(self.request(Method::POST, &session_path(exam_id, "/finish")))
            .await
    }

    #[instrument(skip(self))]
    async fn report_violation(&self, exam_id: ExamId) -> Result<(), ServiceError> {
        self.send_empty(self.request(Method::POST, &session_path(exam_id, "/violation")))
            .await
    }

    #[instrument(skip(self))]
    async fn resume_session(&self, exam_id: ExamId) -> Result<(), ServiceError> {
        self.send_empty(self.request(Method::POST, &session_path(exam_id, "/resume")))
            .await
    }
}

#[async_trait]
impl GraderService for HttpExamService {
    #[instrument(skip(self))]
    async fn allow_student(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<(), ServiceError> {
        let path = student_path(exam_id, student_id, "/allow");
        self.send_empty(self.request(Method::POST, &path)).await
    }

    #[instrument(skip(self))]
    async fn repeat_student(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<(), ServiceError> {
        let path = student_path(exam_id, student_id, "/repeat");
        self.send_empty(self.request(Method::POST, &path)).await
    }

    #[instrument(skip(self))]
    async fn finish_student(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<(), ServiceError> {
        let path = student_path(exam_id, student_id, "/finish");
        self.send_empty(self.request(Method::POST, &path)).await
    }

    #[instrument(skip(self, entry), fields(question_id = entry.question_id))]
    async fn save_score(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        entry: &ScoreEntry,
    ) -> Result<(), ServiceError> {
        let path = student_path(exam_id, student_id, &format!("/scores/{}", entry.question_id));
        self.send_empty(self.request(Method::PUT, &path).json(entry))
            .await
    }

    #[instrument(skip(self))]
    async fn student_answers(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Vec<Answer>, ServiceError> {
        let path = student_path(exam_id, student_id, "/answers");
        self.send_json(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self))]
    async fn student_scores(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Vec<ScoreEntry>, ServiceError> {
        let path = student_path(exam_id, student_id, "/scores");
        self.send_json(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self))]
    async fn list_attendance(&self, exam_id: ExamId) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let path = format!("/api/exams/{exam_id}/attendance");
        self.send_json(self.request(Method::GET, &path)).await
    }
}
