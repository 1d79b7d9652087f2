//! Relation resolution
//!
//! Rewrites a query model for its resolve directives. Many-to-one relations
//! requested eagerly are joined into the query under a fresh alias; every
//! other relation gets a deferred sub-query, built once here and executed
//! per owning instance when the relation is first accessed.

use crate::model::{
    AliasModel, DeferredQuery, JoinCondition, JoinKind, JoinModel, ParameterBinding, PropertyRef,
    QueryModel, ResolveStrategy,
};
use crate::query::{Expr, Query};
use std::sync::Arc;
use tracing::debug;
use xqlorm_core::{
    EntityModel, EntityRegistry, Error, LinkModel, RelationKind, RelationModel, Result,
};

/// Alias of the target entity inside deferred sub-queries
pub const TARGET_ALIAS: &str = "t";

/// Alias of the link entity inside many-to-many sub-queries
pub const VIA_ALIAS: &str = "v";

/// Outcome of resolving one directive
enum Resolution {
    Joined(String),
    Deferred(DeferredQuery),
}

/// Resolves relation directives against entity metadata
pub struct RelationResolver<'a> {
    registry: &'a EntityRegistry,
}

impl<'a> RelationResolver<'a> {
    pub fn new(registry: &'a EntityRegistry) -> Self {
        Self { registry }
    }

    /// Process every pending directive of `model`
    ///
    /// Directives that already carry a relation kind are skipped, so calling
    /// this repeatedly is a no-op after the first success.
    pub fn resolve(&self, model: &mut QueryModel) -> Result<()> {
        for index in 0..model.resolves().len() {
            let directive = &model.resolves()[index];
            if directive.is_processed() {
                continue;
            }
            let alias = directive.alias.clone();
            let property = directive.property.clone();
            let strategy = directive.strategy;

            let owner = model
                .entity_for_alias(&alias)
                .ok_or_else(|| Error::UnknownAlias(alias.clone()))?;
            let owner = self.registry.entity(owner)?;
            let relation = owner
                .require(&property)?
                .relation
                .clone()
                .ok_or_else(|| Error::unknown_property(&owner.name, &property))?;

            let resolution = match (relation.kind, strategy) {
                (RelationKind::ManyToOne, ResolveStrategy::Eager) => {
                    Resolution::Joined(self.join_many_to_one(model, &alias, &property, &relation)?)
                }
                (RelationKind::ManyToOne, ResolveStrategy::Lazy) => {
                    Resolution::Deferred(self.defer_many_to_one(&relation)?)
                }
                (RelationKind::OneToMany, _) => {
                    Resolution::Deferred(self.defer_one_to_many(&relation)?)
                }
                (RelationKind::ManyToMany, _) => {
                    Resolution::Deferred(self.defer_many_to_many(&owner, &property, &relation)?)
                }
            };

            let directive = &mut model.resolves_mut()[index];
            directive.relation = Some(relation.kind);
            match resolution {
                Resolution::Joined(target_alias) => {
                    debug!("Resolved {}.{} eagerly as {}", alias, property, target_alias);
                    directive.target_alias = Some(target_alias);
                }
                Resolution::Deferred(deferred) => {
                    debug!(
                        "Resolved {}.{} as deferred {:?} query on {}",
                        alias, property, relation.kind, relation.target
                    );
                    directive.deferred = Some(deferred);
                }
            }
        }
        Ok(())
    }

    fn join_many_to_one(
        &self,
        model: &mut QueryModel,
        alias: &str,
        property: &str,
        relation: &RelationModel,
    ) -> Result<String> {
        let link = match relation.links.as_slice() {
            [link] => link,
            links => {
                return Err(Error::UnsupportedFeature(format!(
                    "eager many-to-one {alias}.{property} links {} columns; only single-column links can be joined",
                    links.len()
                )));
            }
        };

        let target = self.registry.entity(&relation.target)?;
        target.require(&link.foreign)?;

        let fresh = format!("{alias}_{property}");
        if model.entity_for_alias(&fresh).is_some() {
            return Err(Error::DuplicateAlias(fresh));
        }

        // An explicit select list replaces the implicit one, so pin the
        // currently selected aliases before adding the joined alias.
        if model.aliases().is_empty() {
            let implicit: Vec<String> = model
                .selected_aliases()
                .into_iter()
                .map(str::to_string)
                .collect();
            for selected in implicit {
                model.add_alias(AliasModel::new(&selected));
            }
        }
        model.add_alias(AliasModel::new(&fresh));
        model.add_join(JoinModel::new(
            JoinKind::Left,
            &target.name,
            &fresh,
            vec![JoinCondition::new(
                PropertyRef::new(alias, &link.local),
                PropertyRef::new(&fresh, &link.foreign),
            )],
        ));
        Ok(fresh)
    }

    /// `from Target t where t.<pk> == :<pk> ...`, one parameter per link
    fn defer_many_to_one(&self, relation: &RelationModel) -> Result<DeferredQuery> {
        let target = self.registry.entity(&relation.target)?;
        let query = Query::new().from_as(&target.name, TARGET_ALIAS);
        let (query, bindings) = bind_links(query, &target, TARGET_ALIAS, &relation.links)?;
        Ok(DeferredQuery {
            kind: RelationKind::ManyToOne,
            target: target.name.clone(),
            query: query.into_model(),
            bindings,
        })
    }

    /// `from Target t where t.<fk> == :<fk> ...`, bound to the owner's keys
    fn defer_one_to_many(&self, relation: &RelationModel) -> Result<DeferredQuery> {
        let target = self.registry.entity(&relation.target)?;
        let query = Query::new().from_as(&target.name, TARGET_ALIAS);
        let (query, bindings) = bind_links(query, &target, TARGET_ALIAS, &relation.links)?;
        Ok(DeferredQuery {
            kind: RelationKind::OneToMany,
            target: target.name.clone(),
            query: query.into_model(),
            bindings,
        })
    }

    /// `select t from Target t inner join Via v on v.<a> == t.<b> where v.<fk> == :<fk>`
    fn defer_many_to_many(
        &self,
        owner: &EntityModel,
        property: &str,
        relation: &RelationModel,
    ) -> Result<DeferredQuery> {
        let via_name = relation.via.as_deref().ok_or_else(|| {
            Error::UnsupportedFeature(format!(
                "many-to-many {}.{property} declares no link entity",
                owner.name
            ))
        })?;
        let target = self.registry.entity(&relation.target)?;
        let via = self.registry.entity(via_name)?;

        let on: Vec<(PropertyRef, PropertyRef)> = relation
            .via_links
            .iter()
            .map(|l| {
                via.require(&l.local)?;
                target.require(&l.foreign)?;
                Ok((
                    PropertyRef::new(VIA_ALIAS, &l.local),
                    PropertyRef::new(TARGET_ALIAS, &l.foreign),
                ))
            })
            .collect::<Result<_>>()?;

        let query = Query::new()
            .select(TARGET_ALIAS)
            .from_as(&target.name, TARGET_ALIAS)
            .join(JoinKind::Inner, &via.name, VIA_ALIAS, &on);
        let (query, bindings) = bind_links(query, &via, VIA_ALIAS, &relation.links)?;

        Ok(DeferredQuery {
            kind: RelationKind::ManyToMany,
            target: target.name.clone(),
            query: query.into_model(),
            bindings,
        })
    }
}

/// Add `alias.<foreign> == :<foreign>` for each link, binding each parameter
/// to the owner property on the local side of the link
fn bind_links(
    query: Query,
    filtered: &Arc<EntityModel>,
    alias: &str,
    links: &[LinkModel],
) -> Result<(Query, Vec<ParameterBinding>)> {
    let mut expr: Option<Expr> = None;
    let mut bindings = Vec::with_capacity(links.len());

    for link in links {
        let column = &link.foreign;
        filtered.require(column)?;

        let condition = Expr::prop(alias, column).eq(Expr::param(column));
        expr = Some(match expr {
            Some(expr) => expr.and(condition),
            None => condition,
        });
        bindings.push(ParameterBinding {
            parameter: column.clone(),
            property: link.local.clone(),
        });
    }

    let query = match expr {
        Some(expr) => query.where_expr(expr),
        None => query,
    };
    Ok((query, bindings))
}
