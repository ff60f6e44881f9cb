use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod persona {
    use chrono::{DateTime, Utc};
    use sea_orm::entity::prelude::*;

    #[derive(Debug, PartialEq, Eq, Clone, Copy, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
    pub enum PersonaState {
        #[sea_orm(string_value = "available")]
        Available,
        #[sea_orm(string_value = "suspended")]
        Suspended,
        #[sea_orm(string_value = "blocked")]
        Blocked,
    }

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "personas")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(unique, column_type = "Text")]
        pub fingerprint: String,
        pub health_score: i32,
        pub state: PersonaState,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00001_create_persona"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(persona::Entity))
            .await?;

        // Warm-up loads the whole available set in one query
        manager
            .create_index(
                Index::create()
                    .table(persona::Entity)
                    .name("idx_personas_state")
                    .col(Alias::new("state"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .table(persona::Entity)
                    .name("idx_personas_state")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(persona::Entity).to_owned())
            .await
    }
}
