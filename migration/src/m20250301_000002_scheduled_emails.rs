use sea_orm_migration::prelude::*;

use crate::m20250301_000001_crm_schema::{EmailTemplates, Leads};

#[derive(DeriveIden)]
enum ScheduledEmails {
    Table,
    Id,
    LeadId,
    TemplateId,
    CadenceStep,
    SendAt,
    Status,
    SentAt,
    Error,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduledEmails::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduledEmails::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScheduledEmails::LeadId).integer().not_null())
                    .col(
                        ColumnDef::new(ScheduledEmails::TemplateId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledEmails::CadenceStep)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledEmails::SendAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledEmails::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(ScheduledEmails::SentAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ScheduledEmails::Error).text())
                    .col(
                        ColumnDef::new(ScheduledEmails::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_scheduled_emails_lead")
                            .from(ScheduledEmails::Table, ScheduledEmails::LeadId)
                            .to(Leads::Table, Leads::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_scheduled_emails_template")
                            .from(ScheduledEmails::Table, ScheduledEmails::TemplateId)
                            .to(EmailTemplates::Table, EmailTemplates::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_scheduled_emails_due")
                    .table(ScheduledEmails::Table)
                    .col(ScheduledEmails::Status)
                    .col(ScheduledEmails::SendAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(ScheduledEmails::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
