//! Implements the Forge trait for Gitlab using the v4 REST API.
use base64::{Engine, prelude::BASE64_STANDARD};
use log::*;
use reqwest::{
    Url,
    blocking::{Client, RequestBuilder, Response},
    header::{HeaderMap, HeaderValue},
};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::{cell::RefCell, rc::Rc};

use crate::{
    error::{FleetbumpError, Result},
    forge::{
        config::{DEFAULT_PAGE_SIZE, RemoteConfig},
        gitlab::types::{
            CommitFileBody, DeleteFileBody, GitlabFile, MergeRequestState,
            StateEventBody,
        },
        request::{
            CreateBranchRequest, CreateMergeRequest, FindMergeRequest,
            GetFileContentRequest, ListTreeRequest, MergeRequest, Project,
            TreeItem, UpdateFileRequest,
        },
        traits::Forge,
        transport::{
            Clock, ConfirmLongWait, RateLimiter, RetryHandler, TransportFault,
            parse_retry_after,
        },
    },
};

mod types;

/// Longest error body kept in error messages.
const MAX_ERROR_BODY: usize = 500;

/// Gitlab forge implementation. Every request goes through the rate
/// limiter and the retry handler.
pub struct Gitlab {
    config: RemoteConfig,
    api_url: Url,
    client: Client,
    limiter: RefCell<RateLimiter>,
    retry: RetryHandler,
}

impl Gitlab {
    /// Create Gitlab client with token authentication for gitlab.com or
    /// self-hosted instances.
    pub fn new(
        config: RemoteConfig,
        clock: Rc<dyn Clock>,
        confirm: Rc<dyn ConfirmLongWait>,
    ) -> Result<Self> {
        let token = config.token.expose_secret();
        if token.is_empty() {
            return Err(FleetbumpError::Authentication(
                "no gitlab token configured".into(),
            ));
        }

        let mut token_value = HeaderValue::from_str(token)?;
        token_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.append("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(Self {
            api_url: config.api_url(),
            limiter: RefCell::new(RateLimiter::new(
                &config.rate_limit,
                Rc::clone(&clock),
            )),
            retry: RetryHandler::new(config.retry.clone(), clock, confirm),
            client,
            config,
        })
    }

    /// Api url built from raw path segments. Segments are percent encoded,
    /// so file paths and namespaced project paths may contain slashes.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn project_url(&self, project_id: u64, segments: &[&str]) -> Url {
        let id = project_id.to_string();
        let mut all = vec!["projects", id.as_str()];
        all.extend_from_slice(segments);
        self.url(&all)
    }

    /// Sends a request built by `build`, retrying according to the retry
    /// policy. Non-success statuses become errors.
    fn send(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        self.retry.execute(operation, || {
            self.limiter.borrow_mut().acquire();
            let response = build().send()?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|h| h.to_str().ok()),
            );
            let message =
                truncate_error_body(response.text().unwrap_or_default());

            Err(TransportFault::Status {
                status: status.as_u16(),
                retry_after,
                message,
            })
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
    ) -> Result<T> {
        let response = self.send(operation, || self.client.get(url.clone()))?;
        Ok(response.json()?)
    }

    /// Follows page numbers until a short page or no `x-next-page` header.
    fn get_paginated<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
    ) -> Result<Vec<T>> {
        let mut items = vec![];
        let mut page = 1u32;

        loop {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("per_page", &DEFAULT_PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());

            let response =
                self.send(operation, || self.client.get(page_url.clone()))?;

            let next_page = response
                .headers()
                .get("x-next-page")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.trim().parse::<u32>().ok());

            let batch: Vec<T> = response.json()?;
            let count = batch.len();
            items.extend(batch);

            match next_page {
                Some(next) if next > page && count > 0 => page = next,
                None if count == DEFAULT_PAGE_SIZE as usize => page += 1,
                _ => break,
            }
        }

        debug!("{operation}: fetched {} items", items.len());
        Ok(items)
    }
}

/// Cuts an error body to at most `MAX_ERROR_BODY` bytes on a character
/// boundary.
fn truncate_error_body(mut message: String) -> String {
    if message.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

impl Forge for Gitlab {
    fn remote_config(&self) -> RemoteConfig {
        self.config.clone()
    }

    fn get_project(&self, id_or_path: &str) -> Result<Project> {
        let url = self.url(&["projects", id_or_path]);
        self.get_json("get project", url)
    }

    fn list_projects(&self, group: Option<String>) -> Result<Vec<Project>> {
        let mut url = match &group {
            Some(group) => self.url(&["groups", group.as_str(), "projects"]),
            None => self.url(&["projects"]),
        };

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("archived", "false");
            if group.is_some() {
                query.append_pair("include_subgroups", "true");
            } else {
                query.append_pair("membership", "true");
            }
        }

        self.get_paginated("list projects", url)
    }

    fn list_tree(&self, req: ListTreeRequest) -> Result<Vec<TreeItem>> {
        let mut url = self.project_url(req.project_id, &["repository", "tree"]);
        url.query_pairs_mut()
            .append_pair("recursive", "true")
            .append_pair("ref", &req.git_ref);

        match self.get_paginated("list repository tree", url) {
            Ok(items) => Ok(items),
            // empty repositories have no tree
            Err(err) if err.is_not_found() => Ok(vec![]),
            Err(err) => Err(err),
        }
    }

    fn get_file_content(
        &self,
        req: GetFileContentRequest,
    ) -> Result<Option<String>> {
        let mut url = self
            .project_url(req.project_id, &["repository", "files", req.path.as_str()]);
        url.query_pairs_mut().append_pair("ref", &req.git_ref);

        let file: GitlabFile = match self.get_json("get file content", url) {
            Ok(file) => file,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };

        if file.encoding != "base64" && !file.encoding.is_empty() {
            return Ok(Some(file.content));
        }

        let cleaned: String = file
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = BASE64_STANDARD.decode(cleaned)?;
        Ok(Some(String::from_utf8(bytes)?))
    }

    fn update_file(&self, req: UpdateFileRequest) -> Result<()> {
        let url = self
            .project_url(req.project_id, &["repository", "files", req.path.as_str()]);
        let body = CommitFileBody {
            branch: req.branch.clone(),
            content: BASE64_STANDARD.encode(&req.content),
            encoding: "base64",
            commit_message: req.commit_message.clone(),
        };

        if req.create {
            self.send("create file", || {
                self.client.post(url.clone()).json(&body)
            })?;
        } else {
            self.send("update file", || {
                self.client.put(url.clone()).json(&body)
            })?;
        }

        debug!("committed {} to {}", req.path, req.branch);
        Ok(())
    }

    fn delete_file(
        &self,
        project_id: u64,
        path: String,
        branch: String,
        commit_message: String,
    ) -> Result<()> {
        let url = self.project_url(project_id, &["repository", "files", path.as_str()]);
        let body = DeleteFileBody {
            branch,
            commit_message,
        };
        self.send("delete file", || self.client.delete(url.clone()).json(&body))?;
        Ok(())
    }

    fn create_branch(&self, req: CreateBranchRequest) -> Result<()> {
        let mut url =
            self.project_url(req.project_id, &["repository", "branches"]);
        url.query_pairs_mut()
            .append_pair("branch", &req.branch)
            .append_pair("ref", &req.git_ref);
        self.send("create branch", || self.client.post(url.clone()))?;
        Ok(())
    }

    fn delete_branch(&self, project_id: u64, branch: String) -> Result<bool> {
        let url =
            self.project_url(project_id, &["repository", "branches", branch.as_str()]);
        match self.send("delete branch", || self.client.delete(url.clone())) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn branch_exists(&self, project_id: u64, branch: String) -> Result<bool> {
        let url =
            self.project_url(project_id, &["repository", "branches", branch.as_str()]);
        match self.send("get branch", || self.client.get(url.clone())) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn create_merge_request(
        &self,
        project_id: u64,
        req: CreateMergeRequest,
    ) -> Result<MergeRequest> {
        let url = self.project_url(project_id, &["merge_requests"]);
        let response = self.send("create merge request", || {
            self.client.post(url.clone()).json(&req)
        })?;
        let merge_request: MergeRequest = response.json()?;
        info!("created merge request: {}", merge_request.web_url);
        Ok(merge_request)
    }

    fn find_open_merge_request(
        &self,
        req: FindMergeRequest,
    ) -> Result<Option<MergeRequest>> {
        let mut url = self.project_url(req.project_id, &["merge_requests"]);
        url.query_pairs_mut()
            .append_pair("state", "opened")
            .append_pair("target_branch", &req.target_branch)
            .append_pair("search", &req.title)
            .append_pair("in", "title");

        let found: Vec<MergeRequest> =
            self.get_paginated("find merge request", url)?;

        Ok(found.into_iter().find(|mr| mr.title == req.title))
    }

    fn get_merge_request_state(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Option<String>> {
        let iid = iid.to_string();
        let url = self.project_url(project_id, &["merge_requests", iid.as_str()]);
        match self.get_json::<MergeRequestState>("get merge request", url) {
            Ok(mr) => Ok(Some(mr.state)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn close_merge_request(&self, project_id: u64, iid: u64) -> Result<()> {
        let iid = iid.to_string();
        let url = self.project_url(project_id, &["merge_requests", iid.as_str()]);
        let body = StateEventBody {
            state_event: "close",
        };
        self.send("close merge request", || {
            self.client.put(url.clone()).json(&body)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        forge::transport::{AutoConfirm, tests::FakeClock},
        test_helpers::create_test_remote_config,
    };

    fn client() -> Gitlab {
        Gitlab::new(
            create_test_remote_config(),
            Rc::new(FakeClock::new()),
            Rc::new(AutoConfirm(false)),
        )
        .unwrap()
    }

    #[test]
    fn error_body_is_cut_on_a_character_boundary() {
        let body = format!("{}é rest", "a".repeat(MAX_ERROR_BODY - 1));
        let message = truncate_error_body(body);
        assert_eq!(message, "a".repeat(MAX_ERROR_BODY - 1));

        let short = "404 Datei nicht gefunden: Größe".to_string();
        assert_eq!(truncate_error_body(short.clone()), short);

        let long = "ü".repeat(MAX_ERROR_BODY);
        let message = truncate_error_body(long);
        assert_eq!(message.len(), MAX_ERROR_BODY);
        assert!(message.chars().all(|c| c == 'ü'));
    }

    #[test]
    fn rejects_missing_token() {
        let mut config = create_test_remote_config();
        config.token = "".to_string().into();
        let result = Gitlab::new(
            config,
            Rc::new(FakeClock::new()),
            Rc::new(AutoConfirm(false)),
        );
        assert!(matches!(result, Err(FleetbumpError::Authentication(_))));
    }

    #[test]
    fn encodes_namespaced_project_paths() {
        let gitlab = client();
        let url = gitlab.url(&["projects", "group/sub/service"]);
        assert_eq!(
            url.as_str(),
            "https://gitlab.com/api/v4/projects/group%2Fsub%2Fservice"
        );
    }

    #[test]
    fn encodes_file_paths() {
        let gitlab = client();
        let url = gitlab.project_url(
            42,
            &["repository", "files", "src/App/App.csproj"],
        );
        assert_eq!(
            url.as_str(),
            "https://gitlab.com/api/v4/projects/42/repository/files/src%2FApp%2FApp.csproj"
        );
    }
}
