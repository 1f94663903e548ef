use crate::config::Config;
use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Debug;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use surrealdb::{Response, Surreal};
use tracing::{debug, error, info};

/// 数据库服务
#[derive(Clone)]
pub struct Database {
    client: Surreal<Any>,
    pub config: Config,
}

impl Database {
    /// 创建新的数据库实例；`mem://` 用于测试与本地开发
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let client = any::connect(config.database_url.as_str()).await?;

        // 内存引擎没有账户体系
        if !config.database_url.starts_with("mem://") {
            client
                .signin(Root {
                    username: &config.database_username,
                    password: &config.database_password,
                })
                .await?;
        }

        client
            .use_ns(config.database_namespace.as_str())
            .use_db(config.database_name.as_str())
            .await?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match self.client.query("INFO FOR DB").await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(AppError::from(e))
            }
        }
    }

    /// 执行原始SQL查询
    pub async fn query(&self, sql: &str) -> Result<Response> {
        let response = self.client.query(sql).await?;
        Ok(response.check()?)
    }

    /// 执行带参数的查询
    pub async fn query_with_params<P>(&self, sql: &str, params: P) -> Result<Response>
    where
        P: Serialize,
    {
        debug!("Executing query: {}", sql.trim());
        let response = self.client.query(sql).bind(params).await?;
        Ok(response.check()?)
    }

    /// 以指定ID创建记录；ID已存在时返回冲突
    pub async fn create<T>(&self, table: &str, id: &str, data: T) -> Result<T>
    where
        T: Serialize + Send + Sync + Debug,
    {
        let exists: Option<Value> = self.get_by_id(table, id).await?;
        if exists.is_some() {
            return Err(AppError::Conflict(format!("{} {} already exists", table, id)));
        }

        self.query_with_params(
            "CREATE type::thing($table, $id) CONTENT $content",
            json!({
                "table": table,
                "id": id,
                "content": Self::content_of(&data)?,
            }),
        )
        .await?;

        Ok(data)
    }

    /// 整体写入记录（不存在则创建）
    pub async fn upsert<T>(&self, table: &str, id: &str, data: T) -> Result<T>
    where
        T: Serialize + Send + Sync + Debug,
    {
        self.query_with_params(
            "UPDATE type::thing($table, $id) CONTENT $content",
            json!({
                "table": table,
                "id": id,
                "content": Self::content_of(&data)?,
            }),
        )
        .await?;

        Ok(data)
    }

    /// 选择整张表
    pub async fn select_all<T>(&self, table: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + Debug,
    {
        let mut response = self
            .query_with_params(
                "SELECT *, meta::id(id) AS id FROM type::table($table)",
                json!({ "table": table }),
            )
            .await?;
        Ok(response.take(0)?)
    }

    /// 按单个字段等值查找
    pub async fn find_by<T, V>(&self, table: &str, field: &str, value: V) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + Debug,
        V: Serialize,
    {
        let query = format!(
            "SELECT *, meta::id(id) AS id FROM type::table($table) WHERE {} = $value",
            field
        );
        let mut response = self
            .query_with_params(&query, json!({ "table": table, "value": value }))
            .await?;
        Ok(response.take(0)?)
    }

    /// 通过ID获取单个记录
    pub async fn get_by_id<T>(&self, table: &str, id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + Debug,
    {
        let mut response = self
            .query_with_params(
                "SELECT *, meta::id(id) AS id FROM type::thing($table, $id)",
                json!({ "table": table, "id": id }),
            )
            .await?;
        let results: Vec<T> = response.take(0)?;
        Ok(results.into_iter().next())
    }

    /// 通过ID删除记录
    pub async fn delete_by_id(&self, table: &str, id: &str) -> Result<()> {
        self.query_with_params(
            "DELETE type::thing($table, $id)",
            json!({ "table": table, "id": id }),
        )
        .await?;
        Ok(())
    }

    /// 记录ID由 `type::thing` 决定，内容中不能再带 id 字段
    fn content_of<T: Serialize>(data: &T) -> Result<Value> {
        let mut content = serde_json::to_value(data)?;
        if let Value::Object(map) = &mut content {
            map.remove("id");
        }
        Ok(content)
    }
}

/// 分页结果结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

impl<T> PaginatedResult<T> {
    /// 对已排序的全集做内存分页
    pub fn paginate(items: Vec<T>, page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let total = items.len();
        let total_pages = (total + per_page - 1) / per_page;
        let data = items
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        Self {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Record {
        id: String,
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_database_connection() {
        let config = Config::default();
        let db = Database::new(&config).await.unwrap();
        assert!(db.verify_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_get_upsert_delete() {
        let db = Database::new(&Config::default()).await.unwrap();
        let record = Record {
            id: "r1".to_string(),
            name: "first".to_string(),
            count: 1,
        };

        db.create("record", "r1", record.clone()).await.unwrap();
        let fetched: Option<Record> = db.get_by_id("record", "r1").await.unwrap();
        assert_eq!(fetched, Some(record.clone()));

        let duplicate = db.create("record", "r1", record.clone()).await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));

        let updated = Record { count: 2, ..record };
        db.upsert("record", "r1", updated.clone()).await.unwrap();
        let found: Vec<Record> = db.find_by("record", "name", "first").await.unwrap();
        assert_eq!(found, vec![updated]);

        db.delete_by_id("record", "r1").await.unwrap();
        let all: Vec<Record> = db.select_all("record").await.unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_paginate() {
        let page = PaginatedResult::paginate((1..=45).collect::<Vec<_>>(), 3, 20);
        assert_eq!(page.data, (41..=45).collect::<Vec<_>>());
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages, 3);
    }
}
