use crate::{
    config::Config,
    error::Result,
    services::{
        channels::Channels, AuthService, CampaignService, Database, DispatchService, JobService,
        NotificationService, PreferenceService, RosterService, ScheduleService, TaskExecutor,
        TaskRunner, TemplateService,
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 数据库连接
    pub db: Arc<Database>,

    /// 令牌校验
    pub auth_service: AuthService,

    /// 客户名册
    pub roster_service: RosterService,

    /// 通知偏好与推送订阅
    pub preference_service: PreferenceService,

    /// 通知模板
    pub template_service: TemplateService,

    /// 通知日志
    pub notification_service: NotificationService,

    /// 多渠道投递
    pub dispatch_service: DispatchService,

    /// 营销投放
    pub campaign_service: CampaignService,

    /// 定时投放
    pub schedule_service: ScheduleService,

    /// 任务入口（内联或后台 worker）
    pub runner: TaskRunner,
}

impl AppState {
    /// 初始化所有服务；后台 worker 在取消令牌触发后退出
    pub async fn new(config: Config, db: Arc<Database>, cancel: CancellationToken) -> Result<Self> {
        let auth_service = AuthService::new(&config);
        let roster_service = RosterService::new(db.clone()).await?;
        let preference_service = PreferenceService::new(db.clone()).await?;
        let template_service = TemplateService::new(db.clone()).await?;
        let notification_service = NotificationService::new(db.clone()).await?;

        let channels = Channels::from_config(&config)?;
        let dispatch_service = DispatchService::new(
            &config,
            preference_service.clone(),
            notification_service.clone(),
            channels,
        );
        let campaign_service = CampaignService::new(
            template_service.clone(),
            roster_service.clone(),
            dispatch_service.clone(),
        );
        let schedule_service =
            ScheduleService::new(db.clone(), template_service.clone(), campaign_service.clone()).await?;
        let job_service = JobService::new(
            &config,
            roster_service.clone(),
            template_service.clone(),
            preference_service.clone(),
            notification_service.clone(),
            dispatch_service.clone(),
        );

        let executor = TaskExecutor::new(campaign_service.clone(), schedule_service.clone(), job_service);
        let runner = TaskRunner::from_config(&config, executor, cancel);

        Ok(Self {
            config,
            db,
            auth_service,
            roster_service,
            preference_service,
            template_service,
            notification_service,
            dispatch_service,
            campaign_service,
            schedule_service,
            runner,
        })
    }
}
