use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use reqwest::{redirect, Client};
use std::sync::Arc;

use crate::api;
use crate::config::Config;
use crate::constants::DEFAULT_CONNECT_TIMEOUT;
use crate::dispatch::top_vhost_filter;
use crate::files;
use crate::metrics::Metrics;
use crate::registry::{
    get_app_registry, get_metadata_provider, get_share_registry, AppRegistry, MetadataProvider,
    ShareRegistry,
};
use crate::status::ServiceInfo;

/// 服务上下文，局域网监听和隧道共用同一份
pub struct FsService {
    pub config: Config,
    pub info: ServiceInfo,
    pub shares: Arc<dyn ShareRegistry>,
    pub apps: Arc<dyn AppRegistry>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub metrics: Arc<Metrics>,
    pub client: Client,
}

impl FsService {
    pub fn new(version: &str, config: Config) -> Result<Self> {
        let shares = get_share_registry(&config);
        let apps = get_app_registry(&config);
        let metadata = get_metadata_provider(&config);
        Self::with_capabilities(version, config, shares, apps, metadata)
    }

    /// 使用指定的共享、应用和元数据来源创建服务
    pub fn with_capabilities(
        version: &str,
        config: Config,
        shares: Arc<dyn ShareRegistry>,
        apps: Arc<dyn AppRegistry>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Result<Self> {
        // 反向代理不跟随重定向，原样交给客户端
        let client = Client::builder()
            .connect_timeout(*DEFAULT_CONNECT_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()?;

        let info = ServiceInfo::new(version, &config.local_addr);

        Ok(FsService {
            config,
            info,
            shares,
            apps,
            metadata,
            metrics: Arc::new(Metrics::new()),
            client,
        })
    }

    pub fn create_router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(
                "/shares",
                get(api::serve_shares).fallback(api::method_not_allowed),
            )
            .route(
                "/files",
                get(files::serve_file)
                    .delete(files::delete_file)
                    .post(files::upload_file)
                    .fallback(api::method_not_allowed)
                    .layer(DefaultBodyLimit::disable()),
            )
            .route("/apps", get(api::apps_list).fallback(api::method_not_allowed))
            .route("/md", get(api::get_metadata).fallback(api::method_not_allowed))
            .route(
                "/hda_debug",
                get(api::hda_debug).fallback(api::method_not_allowed),
            )
            .fallback(api::not_found)
            .layer(from_fn_with_state(self.clone(), top_vhost_filter))
            .with_state(self.clone())
    }
}

impl std::fmt::Debug for FsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsService")
            .field("version", &self.info.version)
            .field("local_addr", &self.info.local_addr)
            .field("root_dir", &self.config.root_dir)
            .field("relay", &self.info.relay.state())
            .finish()
    }
}
